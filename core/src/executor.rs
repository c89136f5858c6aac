//! The transport seam.
//!
//! # Design
//! The pipeline never performs I/O itself. It hands an [`HttpRequest`] to an
//! [`Executor`] and gets back a [`TransportOutcome`], the raw triple of body,
//! response head and error that the provider later folds into a single
//! result. [`UreqExecutor`] is the bundled implementation: ureq is blocking,
//! so each call runs on tokio's blocking pool, and HTTP error statuses come
//! back as data rather than as errors.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use ureq::{Agent, RequestBuilder};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Raw result of one transport round-trip. Any combination of fields may be
/// present; the provider decides what it means.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportOutcome {
    pub data: Option<Vec<u8>>,
    pub response: Option<HttpResponse>,
    pub error: Option<TransportError>,
}

impl TransportOutcome {
    pub fn response(response: HttpResponse, data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: TransportError) -> Self {
        Self {
            data: None,
            response: None,
            error: Some(error),
        }
    }

    /// Failure that still carries the partial response.
    pub fn failure_with_response(error: TransportError, response: HttpResponse, data: Option<Vec<u8>>) -> Self {
        Self {
            data,
            response: Some(response),
            error: Some(error),
        }
    }
}

/// Performs HTTP round-trips on behalf of the pipeline.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> TransportOutcome;
}

/// Blocking ureq agent driven from tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct UreqExecutor {
    agent: Agent,
    default_timeout: Option<Duration>,
}

impl Default for UreqExecutor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl UreqExecutor {
    /// `default_timeout` applies to requests that do not set their own.
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            agent: build_agent(default_timeout),
            default_timeout,
        }
    }

    fn agent_for(&self, request: &HttpRequest) -> Agent {
        match request.timeout {
            Some(timeout) if Some(timeout) != self.default_timeout => build_agent(Some(timeout)),
            _ => self.agent.clone(),
        }
    }
}

fn build_agent(timeout: Option<Duration>) -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(timeout)
        .build()
        .new_agent()
}

#[async_trait]
impl Executor for UreqExecutor {
    async fn execute(&self, request: HttpRequest) -> TransportOutcome {
        let agent = self.agent_for(&request);
        match tokio::task::spawn_blocking(move || execute_blocking(&agent, request)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(error = %err, "transport task did not complete");
                TransportOutcome::failure(TransportError::Unknown)
            }
        }
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn execute_blocking(agent: &Agent, request: HttpRequest) -> TransportOutcome {
    let url = request.url.as_str();
    let headers = &request.headers;
    let body = request.body.as_deref();

    let result = match request.method {
        HttpMethod::Get | HttpMethod::Delete => {
            let builder = match request.method {
                HttpMethod::Delete => agent.delete(url),
                _ => agent.get(url),
            };
            let builder = with_headers(builder, headers);
            match body {
                Some(body) => builder.force_send_body().send(body),
                None => builder.call(),
            }
        }
        HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => {
            let builder = match request.method {
                HttpMethod::Put => agent.put(url),
                HttpMethod::Patch => agent.patch(url),
                _ => agent.post(url),
            };
            let builder = with_headers(builder, headers);
            match body {
                Some(body) => builder.send(body),
                None => builder.send_empty(),
            }
        }
    };

    let mut response = match result {
        Ok(response) => response,
        Err(err) => return TransportOutcome::failure(map_error(err)),
    };

    let head = HttpResponse {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
    };

    match response.body_mut().read_to_vec() {
        Ok(data) => TransportOutcome::response(head, data),
        Err(err) => TransportOutcome::failure_with_response(map_error(err), head, None),
    }
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::TimedOut,
        ureq::Error::HostNotFound => TransportError::Connection("host not found".to_string()),
        ureq::Error::Io(io) => TransportError::Connection(io.to_string()),
        other => TransportError::Custom {
            domain: "ureq".to_string(),
            code: -1,
            message: other.to_string(),
        },
    }
}
