//! Resolution of API definitions into concrete targets, and of targets into
//! transport requests.
//!
//! # Design
//! Two seams sit between an `ApiDefinition` and the wire. A
//! [`TargetResolver`] decides the final URL (plain base + path, or HAL entity
//! resolution) and may suspend while doing so. A [`RequestMapper`] turns the
//! resolved [`ApiTarget`] into an [`HttpRequest`] synchronously. Both are
//! implemented for plain closures so tests and callers can swap them without
//! defining a type.

use async_trait::async_trait;
use url::Url;

use crate::api::{ApiDefinition, EncodingStrategy};
use crate::encoding::{self, APPLICATION_JSON, CONTENT_TYPE};
use crate::error::ServiceError;
use crate::http::{HttpMethod, HttpRequest};

/// A concrete, resolved representation of an `ApiDefinition`.
#[derive(Debug, Clone)]
pub struct ApiTarget {
    /// The fully resolved URL.
    pub url: Url,
    pub path: String,
    pub method: HttpMethod,
    pub encoding: EncodingStrategy,
    pub headers: Vec<(String, String)>,
}

impl ApiTarget {
    /// Creates a target from a definition and the URL resolved for it.
    pub fn from_definition(api: &ApiDefinition, resolved_url: Url) -> Self {
        Self {
            url: resolved_url,
            path: api.path.clone(),
            method: api.method,
            encoding: api.encoding.clone(),
            headers: api.headers.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets header `name`, replacing any existing value.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Builds the transport request: encodes the payload, applies the
    /// supplied headers, then adds `Content-Type: application/json` for JSON
    /// bodies unless the caller set a content type.
    pub fn to_request(&self) -> Result<HttpRequest, ServiceError> {
        let request = HttpRequest::new(self.method, self.url.as_str());
        let mut request = encoding::encode(request, &self.encoding)?;

        for (name, value) in &self.headers {
            request.add_header(name, value);
        }
        if self.encoding.expects_json_body() && self.header(CONTENT_TYPE).is_none() {
            request.add_header(CONTENT_TYPE, APPLICATION_JSON);
        }
        Ok(request)
    }
}

/// Maps an API definition to a target with a resolved URL.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, api: &ApiDefinition) -> Result<ApiTarget, ServiceError>;
}

#[async_trait]
impl<F> TargetResolver for F
where
    F: Fn(&ApiDefinition) -> Result<ApiTarget, ServiceError> + Send + Sync,
{
    async fn resolve(&self, api: &ApiDefinition) -> Result<ApiTarget, ServiceError> {
        self(api)
    }
}

/// Resolves `base_url` joined with `path`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTargetResolver;

impl DefaultTargetResolver {
    pub fn resolve_url(api: &ApiDefinition) -> Result<Url, ServiceError> {
        let mut url = Url::parse(&api.base_url)
            .map_err(|_| ServiceError::InvalidResolvedUrl(api.base_url.clone()))?;
        if !api.path.is_empty() {
            let base = url.path().trim_end_matches('/').to_string();
            let path = api.path.trim_start_matches('/');
            url.set_path(&format!("{base}/{path}"));
        }
        Ok(url)
    }
}

#[async_trait]
impl TargetResolver for DefaultTargetResolver {
    async fn resolve(&self, api: &ApiDefinition) -> Result<ApiTarget, ServiceError> {
        let url = Self::resolve_url(api)?;
        Ok(ApiTarget::from_definition(api, url))
    }
}

/// Maps a resolved target to a transport request.
pub trait RequestMapper: Send + Sync {
    fn map(&self, target: &ApiTarget) -> Result<HttpRequest, ServiceError>;
}

impl<F> RequestMapper for F
where
    F: Fn(&ApiTarget) -> Result<HttpRequest, ServiceError> + Send + Sync,
{
    fn map(&self, target: &ApiTarget) -> Result<HttpRequest, ServiceError> {
        self(target)
    }
}

/// Uses [`ApiTarget::to_request`]. Targets that are not `http` or `https`
/// (such as a HAL definition that never went through entity resolution)
/// fail with [`ServiceError::RequestMapping`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRequestMapper;

impl RequestMapper for DefaultRequestMapper {
    fn map(&self, target: &ApiTarget) -> Result<HttpRequest, ServiceError> {
        if !matches!(target.url.scheme(), "http" | "https") {
            return Err(ServiceError::RequestMapping(Box::new(target.clone())));
        }
        target.to_request()
    }
}
