//! Abstract API definitions: the **what** of an endpoint.
//!
//! # Design
//! An `ApiDefinition` is a value built per call-site and never mutated once
//! handed to the provider. Payloads are kept as `Arc<dyn JsonRepresentable>`
//! and only serialized when the request is mapped, so a payload that fails to
//! serialize surfaces as a typed `ServiceError` instead of failing at
//! construction time.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::BoxError;
use crate::hal::EntityResolution;
use crate::http::HttpMethod;

/// Base URL used by definitions whose URL comes from HAL entity resolution.
pub const HAL_BASE_URL: &str = "hal://";

/// Path used by definitions whose URL comes from HAL entity resolution.
pub const HAL_PATH: &str = "entity";

/// A value that can be represented as JSON.
///
/// Blanket-implemented for every `Serialize` type, so callers normally pass
/// their own structs straight to [`EncodingStrategy::query`] and friends.
pub trait JsonRepresentable: fmt::Debug + Send + Sync {
    fn to_json(&self) -> Result<Value, serde_json::Error>;
}

impl<T> JsonRepresentable for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Shared, lazily serialized request payload.
pub type Payload = Arc<dyn JsonRepresentable>;

/// Turns a JSON value into body bytes.
pub trait JsonEncoder: fmt::Debug + Send + Sync {
    /// Short identifier reported in `ServiceError::ApplyingBody`.
    fn name(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, BoxError>;
}

/// Compact `serde_json` encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultJsonEncoder;

impl JsonEncoder for DefaultJsonEncoder {
    fn name(&self) -> &str {
        "default"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(value)?)
    }
}

/// Indented `serde_json` encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrettyJsonEncoder;

impl JsonEncoder for PrettyJsonEncoder {
    fn name(&self) -> &str {
        "pretty"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec_pretty(value)?)
    }
}

/// How the payload of a request is encoded. Query strategies never touch the
/// body and body strategies never touch the query string.
#[derive(Debug, Clone, Default)]
pub enum EncodingStrategy {
    #[default]
    None,
    QueryParameters(Payload),
    JsonBody(Payload),
    JsonBodyCustomEncoder(Payload, Arc<dyn JsonEncoder>),
}

impl EncodingStrategy {
    pub fn query<T>(parameters: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        EncodingStrategy::QueryParameters(Arc::new(parameters))
    }

    pub fn json_body<T>(body: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        EncodingStrategy::JsonBody(Arc::new(body))
    }

    pub fn json_body_with<T, E>(body: T, encoder: E) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
        E: JsonEncoder + 'static,
    {
        EncodingStrategy::JsonBodyCustomEncoder(Arc::new(body), Arc::new(encoder))
    }

    /// Whether requests using this strategy should carry
    /// `Content-Type: application/json`.
    pub fn expects_json_body(&self) -> bool {
        matches!(
            self,
            EncodingStrategy::JsonBody(_) | EncodingStrategy::JsonBodyCustomEncoder(..)
        )
    }
}

/// How an API authenticates. Applied by
/// [`AuthenticationPlugin`](crate::plugin::AuthenticationPlugin).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthenticationStrategy {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `<field>: <token>`
    CustomHeaderField(String),
}

impl AuthenticationStrategy {
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            AuthenticationStrategy::Bearer => Some("Bearer"),
            AuthenticationStrategy::None | AuthenticationStrategy::CustomHeaderField(_) => None,
        }
    }
}

/// Immutable description of one endpoint call.
#[derive(Debug, Clone)]
pub struct ApiDefinition {
    pub base_url: String,
    pub path: String,
    pub method: HttpMethod,
    pub encoding: EncodingStrategy,
    pub headers: Vec<(String, String)>,
    /// When set the network is bypassed and these bytes are returned with a
    /// 200 status.
    pub placeholder_data: Option<Vec<u8>>,
    pub authentication: AuthenticationStrategy,
    pub entity_resolution: Option<EntityResolution>,
}

impl ApiDefinition {
    pub fn new(method: HttpMethod, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            method,
            encoding: EncodingStrategy::None,
            headers: Vec::new(),
            placeholder_data: None,
            authentication: AuthenticationStrategy::None,
            entity_resolution: None,
        }
    }

    /// A definition whose URL is resolved through service discovery.
    pub fn hal(method: HttpMethod, resolution: EntityResolution) -> Self {
        let mut api = Self::new(method, HAL_BASE_URL, HAL_PATH);
        api.entity_resolution = Some(resolution);
        api
    }

    pub fn with_encoding(mut self, encoding: EncodingStrategy) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_placeholder_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.placeholder_data = Some(data.into());
        self
    }

    pub fn with_authentication(mut self, authentication: AuthenticationStrategy) -> Self {
        self.authentication = authentication;
        self
    }

    /// Short label used in log events.
    pub fn label(&self) -> String {
        match &self.entity_resolution {
            Some(resolution) => format!("{} {}", self.method, resolution.name()),
            None => format!("{} {}", self.method, self.path),
        }
    }
}
