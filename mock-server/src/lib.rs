use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::debug;

/// Longest delay `/delay/{millis}` will honor.
pub const MAX_DELAY_MS: u64 = 10_000;

/// What the echo routes send back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub url: String,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// The body parsed as JSON, when it is JSON.
    pub json: Option<Value>,
    pub data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct MockState {
    discovery_hits: Arc<AtomicUsize>,
    required_token: Option<String>,
}

impl MockState {
    /// `/discovery` answers 401 unless the request carries
    /// `Authorization: Bearer <token>`.
    pub fn with_required_token(token: impl Into<String>) -> Self {
        Self {
            required_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn discovery_hits(&self) -> usize {
        self.discovery_hits.load(Ordering::SeqCst)
    }
}

pub fn app() -> Router {
    app_with_state(MockState::default())
}

pub fn app_with_state(state: MockState) -> Router {
    Router::new()
        .route("/get", get(echo))
        .route("/post", post(echo))
        .route("/put", put(echo))
        .route("/patch", patch(echo))
        .route("/delete", delete(echo))
        .route("/headers", get(echo_headers))
        .route("/status/{code}", get(status).post(status))
        .route("/delay/{millis}", get(delay))
        .route("/accounts/{id}", get(account))
        .route("/discovery", get(discovery))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, MockState::default()).await
}

pub async fn run_with_state(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

async fn echo(
    method: Method,
    uri: Uri,
    Query(args): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    debug!(%method, %uri, "echo");
    Json(Echo {
        method: method.to_string(),
        url: uri.to_string(),
        args,
        headers: header_map(&headers),
        json: serde_json::from_slice(&body).ok(),
        data: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    Json(json!({ "headers": header_map(&headers) }))
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, Json(json!({ "status": code }))).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn delay(Path(millis): Path<u64>) -> Json<Value> {
    let millis = millis.min(MAX_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Json(json!({ "delay": millis }))
}

async fn account(Path(id): Path<String>) -> Json<Account> {
    Json(Account {
        name: format!("Account {id}"),
        id,
    })
}

/// HAL document whose links point back at this server, as seen through the
/// request's `Host` header.
async fn discovery(State(state): State<MockState>, headers: HeaderMap) -> Response {
    state.discovery_hits.fetch_add(1, Ordering::SeqCst);

    if let Some(token) = &state.required_token {
        let expected = format!("Bearer {token}");
        let presented = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    Json(discovery_document(&format!("http://{host}"))).into_response()
}

pub fn discovery_document(base: &str) -> Value {
    json!({
        "_links": {
            "self": { "href": format!("{base}/discovery") },
            "echo:get": { "href": format!("{base}/get{{?foo,bar}}"), "templated": true },
            "echo:post": format!("{base}/post"),
            "echo:headers": format!("{base}/headers"),
            "echo:status": { "href": format!("{base}/status/{{code}}"), "templated": true },
            "account:x": { "href": format!("{base}/accounts/{{id}}"), "templated": true }
        }
    })
}
