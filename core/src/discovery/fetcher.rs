//! Network source of the discovery document.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::DiscoveryError;
use crate::executor::{Executor, TransportOutcome};
use crate::http::{HttpMethod, HttpRequest};

/// Fetches the raw discovery document.
#[async_trait]
pub trait DiscoveryFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, DiscoveryError>;
}

/// `GET <root>` through an [`Executor`], with an optional bearer token.
#[derive(Clone)]
pub struct HttpDiscoveryFetcher {
    root: Url,
    bearer_token: Option<String>,
    timeout: Duration,
    executor: Arc<dyn Executor>,
}

impl HttpDiscoveryFetcher {
    pub fn new(root: Url, bearer_token: Option<String>, timeout: Duration, executor: Arc<dyn Executor>) -> Self {
        Self {
            root,
            bearer_token,
            timeout,
            executor,
        }
    }

    pub(crate) fn request(&self) -> HttpRequest {
        let mut request = HttpRequest::new(HttpMethod::Get, self.root.as_str());
        request.add_header("Accept", "application/hal+json, application/json");
        if let Some(token) = &self.bearer_token {
            request.add_header("Authorization", format!("Bearer {token}"));
        }
        request.timeout = Some(self.timeout);
        request
    }
}

impl fmt::Debug for HttpDiscoveryFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDiscoveryFetcher")
            .field("root", &self.root.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DiscoveryFetcher for HttpDiscoveryFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, DiscoveryError> {
        let TransportOutcome { data, response, error } = self.executor.execute(self.request()).await;
        if let Some(error) = error {
            debug!(error = %error, root = %self.root, "discovery request failed");
            return Err(DiscoveryError::UrlLoadingFailed);
        }
        match response {
            Some(response) if response.is_success() => Ok(data.unwrap_or_default()),
            Some(response) => {
                debug!(status = response.status, root = %self.root, "discovery request rejected");
                Err(DiscoveryError::UrlLoadingFailed)
            }
            None => Err(DiscoveryError::UrlLoadingFailed),
        }
    }
}
