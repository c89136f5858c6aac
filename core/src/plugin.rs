//! Request and result hooks shared by every request of a provider.
//!
//! # Design
//! A plugin may implement any subset of four hooks; the rest default to
//! no-ops. The provider folds the two mutation hooks over its plugins in
//! registration order, each plugin receiving the previous plugin's output.
//! Plugins are shared across concurrent requests, so any counters or caches
//! they hold need interior synchronization.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::api::{ApiDefinition, AuthenticationStrategy};
use crate::http::HttpRequest;
use crate::provider::DataResult;

pub trait ServicePlugin: Send + Sync {
    /// Transforms the outgoing request.
    fn mutate_request(&self, request: HttpRequest, _api: &ApiDefinition) -> HttpRequest {
        request
    }

    /// Observes the final outgoing request.
    fn will_submit(&self, _request: &HttpRequest, _api: &ApiDefinition) {}

    /// Observes the raw result before any mutation.
    fn did_receive(&self, _result: &DataResult, _api: &ApiDefinition) {}

    /// Transforms the result. May turn a failure into a success and back.
    fn mutate_result(&self, result: DataResult, _api: &ApiDefinition) -> DataResult {
        result
    }
}

type TokenProvider = Arc<dyn Fn(&ApiDefinition) -> Option<String> + Send + Sync>;

/// Adds credentials according to each definition's
/// [`AuthenticationStrategy`]. The token provider is asked on every attempt,
/// so a retry after a token refresh picks up the new token.
#[derive(Clone)]
pub struct AuthenticationPlugin {
    token_provider: TokenProvider,
}

impl AuthenticationPlugin {
    pub fn new<F>(token_provider: F) -> Self
    where
        F: Fn(&ApiDefinition) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            token_provider: Arc::new(token_provider),
        }
    }
}

impl ServicePlugin for AuthenticationPlugin {
    fn mutate_request(&self, mut request: HttpRequest, api: &ApiDefinition) -> HttpRequest {
        let field = match &api.authentication {
            AuthenticationStrategy::None => return request,
            AuthenticationStrategy::Bearer => "Authorization",
            AuthenticationStrategy::CustomHeaderField(field) => field.as_str(),
        };
        let Some(token) = (self.token_provider)(api) else {
            debug!(api = %api.label(), "no token available");
            return request;
        };
        let value = match api.authentication.scheme() {
            Some(scheme) => format!("{scheme} {token}"),
            None => token,
        };
        request.set_header(field, value);
        request
    }
}

/// Logs submitted requests and received results at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlugin;

impl ServicePlugin for LoggingPlugin {
    fn will_submit(&self, request: &HttpRequest, _api: &ApiDefinition) {
        debug!(
            method = %request.method,
            url = %request.url,
            body = %request.body.as_deref().map(pretty_body).unwrap_or_default(),
            "submitting request"
        );
    }

    fn did_receive(&self, result: &DataResult, _api: &ApiDefinition) {
        match result {
            Ok(response) => debug!(
                status = response.status(),
                url = %response.request.url,
                body = %pretty_body(&response.data),
                "received response"
            ),
            Err(err) => debug!(error = %err, "request failed"),
        }
    }
}

fn pretty_body(data: &[u8]) -> String {
    serde_json::from_slice::<Value>(data)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    struct Noop;
    impl ServicePlugin for Noop {}

    fn api(authentication: AuthenticationStrategy) -> ApiDefinition {
        ApiDefinition::new(HttpMethod::Get, "https://h", "/get").with_authentication(authentication)
    }

    fn request() -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, "https://h/get")
    }

    #[test]
    fn default_hooks_pass_through() {
        let api = api(AuthenticationStrategy::None);
        assert_eq!(Noop.mutate_request(request(), &api), request());
        let result: DataResult = Err(crate::error::ServiceError::HalEntityNotFound("x".into()));
        assert!(Noop.mutate_result(result, &api).is_err());
    }

    #[test]
    fn bearer_token_is_added() {
        let plugin = AuthenticationPlugin::new(|_| Some("abc".to_string()));
        let request = plugin.mutate_request(request(), &api(AuthenticationStrategy::Bearer));
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
    }

    #[test]
    fn custom_header_carries_raw_token() {
        let plugin = AuthenticationPlugin::new(|_| Some("abc".to_string()));
        let strategy = AuthenticationStrategy::CustomHeaderField("X-Api-Key".to_string());
        let request = plugin.mutate_request(request(), &api(strategy));
        assert_eq!(request.header("x-api-key"), Some("abc"));
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn unauthenticated_api_is_untouched() {
        let plugin = AuthenticationPlugin::new(|_| Some("abc".to_string()));
        let request = plugin.mutate_request(request(), &api(AuthenticationStrategy::None));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn missing_token_leaves_request_untouched() {
        let plugin = AuthenticationPlugin::new(|_| None);
        let request = plugin.mutate_request(request(), &api(AuthenticationStrategy::Bearer));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn token_replaces_stale_header() {
        let plugin = AuthenticationPlugin::new(|_| Some("fresh".to_string()));
        let mut stale = request();
        stale.add_header("Authorization", "Bearer stale");
        let request = plugin.mutate_request(stale, &api(AuthenticationStrategy::Bearer));
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("Authorization"), Some("Bearer fresh"));
    }

    #[test]
    fn pretty_body_indents_json_and_keeps_text() {
        assert_eq!(pretty_body(br#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(pretty_body(b"plain"), "plain");
    }
}
