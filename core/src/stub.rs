//! Canned responses in place of the network.
//!
//! # Design
//! A stub provider sees the definition and the resolved target and chooses
//! per request: answer with a fake response, fail with a fake transport
//! error, or let the request through to the real executor. The stub path
//! still runs every plugin hook, so stubbed tests exercise the same pipeline
//! as production.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiDefinition;
use crate::encoding::{APPLICATION_JSON, CONTENT_TYPE};
use crate::error::TransportError;
use crate::target::ApiTarget;

/// Response produced by a stub provider.
#[derive(Debug, Clone, PartialEq)]
pub enum StubResponse {
    NetworkResponse {
        status: u16,
        headers: Vec<(String, String)>,
        data: Vec<u8>,
    },
    NetworkError(TransportError),
    /// Fall through to the real executor.
    ContinueCourse,
}

impl StubResponse {
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        StubResponse::NetworkResponse {
            status: 200,
            headers: Vec::new(),
            data: data.into(),
        }
    }

    /// JSON body with a `Content-Type: application/json` header.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        StubResponse::NetworkResponse {
            status,
            headers: vec![(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string())],
            data: value.to_string().into_bytes(),
        }
    }

    /// Body read from a fixture file.
    pub fn from_file(path: impl AsRef<Path>, status: u16) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(StubResponse::NetworkResponse {
            status,
            headers: Vec::new(),
            data,
        })
    }

    pub fn timed_out() -> Self {
        StubResponse::NetworkError(TransportError::TimedOut)
    }
}

/// Chooses a stub response for a request.
pub type StubProvider = Arc<dyn Fn(&ApiDefinition, &ApiTarget) -> StubResponse + Send + Sync>;

/// Whether requests are stubbed.
#[derive(Clone, Default)]
pub enum StubStrategy {
    #[default]
    DontStub,
    Stub {
        /// Applied before the stub answers; cancellation interrupts it.
        delay: Duration,
        provider: StubProvider,
    },
}

impl StubStrategy {
    pub fn immediate<F>(provider: F) -> Self
    where
        F: Fn(&ApiDefinition, &ApiTarget) -> StubResponse + Send + Sync + 'static,
    {
        Self::delayed(Duration::ZERO, provider)
    }

    pub fn delayed<F>(delay: Duration, provider: F) -> Self
    where
        F: Fn(&ApiDefinition, &ApiTarget) -> StubResponse + Send + Sync + 'static,
    {
        StubStrategy::Stub {
            delay,
            provider: Arc::new(provider),
        }
    }
}

impl fmt::Debug for StubStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubStrategy::DontStub => f.write_str("DontStub"),
            StubStrategy::Stub { delay, .. } => f.debug_struct("Stub").field("delay", delay).finish_non_exhaustive(),
        }
    }
}
