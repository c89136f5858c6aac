//! HAL entity resolution.
//!
//! An API definition may name its endpoint symbolically instead of by URL:
//! either by a relation name from the discovery document
//! ([`NamedEntity`]) or by a link URI carried by a previously fetched
//! resource ([`UriEntity`]). [`HalTargetResolver`] turns either into a
//! concrete target through [`ServiceDiscovery`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

use crate::api::{ApiDefinition, Payload};
use crate::discovery::ServiceDiscovery;
use crate::error::{ServiceError, TemplateError};
use crate::target::{ApiTarget, TargetResolver};
use crate::template::UriTemplate;

/// A relation name from the discovery document, plus template variables.
#[derive(Debug, Clone)]
pub struct NamedEntity {
    pub name: String,
    pub variables: Option<Payload>,
}

impl NamedEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: None,
        }
    }

    pub fn with_variables<T>(mut self, variables: T) -> Self
    where
        T: serde::Serialize + std::fmt::Debug + Send + Sync + 'static,
    {
        self.variables = Some(Arc::new(variables));
        self
    }
}

/// A link URI, possibly templated, plus template variables.
#[derive(Debug, Clone)]
pub struct UriEntity {
    pub uri: String,
    pub variables: Option<Payload>,
}

impl UriEntity {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            variables: None,
        }
    }

    pub fn with_variables<T>(mut self, variables: T) -> Self
    where
        T: serde::Serialize + std::fmt::Debug + Send + Sync + 'static,
    {
        self.variables = Some(Arc::new(variables));
        self
    }

    pub fn template(&self) -> Result<UriTemplate, TemplateError> {
        UriTemplate::parse(&self.uri)
    }

    /// Expands the URI with its variables. `None` when the URI is not a
    /// valid template or does not expand to an absolute URL.
    pub fn resolved(&self) -> Option<Url> {
        let template = self.template().ok()?;
        let variables = variables_map(self.variables.as_ref()).unwrap_or_default();
        Url::parse(&template.expand(&variables)).ok()
    }
}

/// How a HAL definition locates its endpoint.
#[derive(Debug, Clone)]
pub enum EntityResolution {
    Named(NamedEntity),
    Linked(UriEntity),
}

impl EntityResolution {
    /// Relation name or link URI, for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            EntityResolution::Named(entity) => &entity.name,
            EntityResolution::Linked(entity) => &entity.uri,
        }
    }

    pub fn variables(&self) -> Option<&Payload> {
        match self {
            EntityResolution::Named(entity) => entity.variables.as_ref(),
            EntityResolution::Linked(entity) => entity.variables.as_ref(),
        }
    }
}

impl From<NamedEntity> for EntityResolution {
    fn from(entity: NamedEntity) -> Self {
        EntityResolution::Named(entity)
    }
}

impl From<UriEntity> for EntityResolution {
    fn from(entity: UriEntity) -> Self {
        EntityResolution::Linked(entity)
    }
}

/// Serializes template variables to a JSON object. Payloads that are not
/// objects, or fail to serialize, yield `None`.
pub(crate) fn variables_map(variables: Option<&Payload>) -> Option<Map<String, Value>> {
    match variables?.to_json() {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Resolves HAL definitions through service discovery.
#[derive(Debug, Clone)]
pub struct HalTargetResolver {
    discovery: Arc<ServiceDiscovery>,
}

impl HalTargetResolver {
    pub fn new(discovery: Arc<ServiceDiscovery>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl TargetResolver for HalTargetResolver {
    async fn resolve(&self, api: &ApiDefinition) -> Result<ApiTarget, ServiceError> {
        let Some(resolution) = &api.entity_resolution else {
            return Err(ServiceError::InvalidResolvedUrl(api.base_url.clone()));
        };
        let variables = variables_map(resolution.variables());

        let url = match resolution {
            EntityResolution::Named(entity) => self
                .discovery
                .url_for_entry_relation_named(&entity.name, variables.as_ref()),
            EntityResolution::Linked(entity) => self.discovery.url_for_hal_link(&entity.uri, variables.as_ref()),
        };

        match url {
            Some(url) => Ok(ApiTarget::from_definition(api, url)),
            None => Err(ServiceError::HalEntityNotFound(resolution.name().to_string())),
        }
    }
}
