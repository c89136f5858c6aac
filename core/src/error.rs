//! Error types for the request pipeline and service discovery.
//!
//! # Design
//! Every failure a caller can observe is a `ServiceError` delivered through
//! the request's result; nothing panics across the pipeline boundary.
//! Transport failures keep whatever partial response came back so callers can
//! inspect status and headers. `TransportError` and `DiscoveryError` are
//! `Clone + PartialEq` because stubs and tests construct and compare them.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::Payload;
use crate::provider::DataResponse;
use crate::target::ApiTarget;

/// Boxed error used where the concrete cause is supplied by the caller
/// (custom encoders, response parsers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by an [`Executor`](crate::executor::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request was cancelled")]
    Cancelled,

    #[error("request timed out")]
    TimedOut,

    /// The host could not be reached or the connection dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The executor reported neither a response nor an error.
    #[error("unknown transport error")]
    Unknown,

    /// Anything else, described by a domain and code (stubs use this to fake
    /// arbitrary network failures).
    #[error("{domain} error {code}: {message}")]
    Custom {
        domain: String,
        code: i64,
        message: String,
    },
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    /// True for failures caused by missing connectivity rather than by the
    /// server.
    pub fn is_network_connection_error(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }
}

/// All errors that can result from performing a request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The URL could not be resolved while building the target.
    #[error("the resolved url is invalid: {0}")]
    InvalidResolvedUrl(String),

    /// The named HAL entity is unknown to service discovery.
    #[error("HAL entity not found: {0}")]
    HalEntityNotFound(String),

    /// Query parameters could not be built from the payload.
    #[error("failed to encode query parameters for {url}")]
    ParameterEncoding { url: String, payload: Payload },

    /// The payload could not be encoded as the request body.
    #[error("failed to apply request body with the {encoder} encoder: {source}")]
    ApplyingBody {
        payload: Payload,
        encoder: String,
        #[source]
        source: BoxError,
    },

    /// The target could not be turned into a request for an unknown reason.
    #[error("failed to map target {} to a request", .0.url)]
    RequestMapping(Box<ApiTarget>),

    /// The body did not decode into the expected type.
    #[error("failed parsing response: {source}")]
    Parsing {
        #[source]
        source: BoxError,
        response: DataResponse,
    },

    /// A network-level failure. This is not an API error response.
    #[error("{error}")]
    Underlying {
        #[source]
        error: TransportError,
        response: Option<DataResponse>,
    },

    /// The request went through but the API answered with an error payload.
    #[error("api error response: {error}")]
    Api {
        error: BoxError,
        response: DataResponse,
    },
}

impl ServiceError {
    /// The raw response attached to this error, if any.
    pub fn data_response(&self) -> Option<&DataResponse> {
        match self {
            ServiceError::Parsing { response, .. } | ServiceError::Api { response, .. } => {
                Some(response)
            }
            ServiceError::Underlying { response, .. } => response.as_ref(),
            _ => None,
        }
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            ServiceError::Underlying { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.transport_error().is_some_and(TransportError::is_cancelled)
    }

    pub fn is_network_connection_error(&self) -> bool {
        self.transport_error()
            .is_some_and(TransportError::is_network_connection_error)
    }
}

/// Failure reported by a [`ResponseParser`](crate::parser::ResponseParser).
#[derive(Debug, Error)]
pub enum ParsingError {
    /// The body could not be decoded.
    #[error("failed to decode response body: {0}")]
    Parsing(#[source] BoxError),

    /// The body decoded into an error response defined by the API contract.
    #[error("api returned an error response: {0}")]
    Response(BoxError),
}

/// Syntax error in a URI template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed expression starting at offset {0}")]
    UnclosedExpression(usize),

    #[error("unmatched '}}' at offset {0}")]
    UnmatchedClose(usize),

    #[error("empty expression at offset {0}")]
    EmptyExpression(usize),

    #[error("unsupported operator '{0}'")]
    UnsupportedOperator(char),

    #[error("invalid variable name {0:?}")]
    InvalidVariable(String),

    #[error("invalid prefix modifier in {0:?}")]
    InvalidPrefix(String),
}

/// Errors raised by service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// A refresh was requested too soon after the last update.
    #[error("service discovery refreshes too often")]
    DiscoveryIsUpToDate,

    #[error("service discovery failed to load from server")]
    UrlLoadingFailed,

    #[error("failed to parse service discovery document")]
    ParsingFailed,

    #[error("service discovery file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// An overlay or underlay entry was rejected.
    #[error("invalid URI template for relation {name}: {source}")]
    InvalidTemplate {
        name: String,
        #[source]
        source: TemplateError,
    },

    /// The configured API root is not a valid URL.
    #[error("invalid service discovery root: {0}")]
    InvalidApiRoot(String),

    /// Reading or writing the local snapshot failed.
    #[error("service discovery persistence failed: {0}")]
    Persistence(String),
}
