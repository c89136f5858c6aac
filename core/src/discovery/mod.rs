//! Service discovery: relation names to URLs.
//!
//! # Overview
//! A [`ServiceDiscovery`] holds the HAL document published at an API root
//! and answers "which URL serves relation `account:x`?". Two in-memory maps
//! adjust the answer at runtime: the overlay wins over the document, the
//! underlay fills in what the document lacks.
//!
//! # Design
//! - The document lives in an `ArcSwapOption`, so lookups never block on a
//!   refresh and always see a whole document.
//! - `load` and `refresh_service_discovery_if_necessary` are the only writers
//!   and are serialized by an async mutex.
//! - Staleness uses tokio's clock, which tests can pause and advance.
//! - A network document is saved to [`DiscoveryPersistence`] on the blocking
//!   pool; failing to save is logged and otherwise ignored.

mod config;
mod fetcher;
mod persistence;
mod resource;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub use config::{default_storage_dir, DiscoveryConfig, DEFAULT_REQUEST_TIMEOUT_MS, LOCAL_CACHE_MAX_AGE, REFRESH_GUARD};
pub use fetcher::{DiscoveryFetcher, HttpDiscoveryFetcher};
pub use persistence::{DiscoveryPersistence, FilePersistence, MemoryPersistence};
pub use resource::{HalLink, HalResource};

use crate::error::DiscoveryError;
use crate::executor::{Executor, UreqExecutor};
use crate::template::UriTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Uninitialized,
    Loading,
    Ready,
}

pub struct ServiceDiscovery {
    api_root: Url,
    local_file: Option<PathBuf>,
    fetcher: Arc<dyn DiscoveryFetcher>,
    persistence: Arc<dyn DiscoveryPersistence>,
    resource: ArcSwapOption<HalResource>,
    last_updated: RwLock<Option<Instant>>,
    state: RwLock<DiscoveryState>,
    overlay: RwLock<HashMap<String, UriTemplate>>,
    underlay: RwLock<HashMap<String, UriTemplate>>,
    writer: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ServiceDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDiscovery")
            .field("api_root", &self.api_root.as_str())
            .field("local_file", &self.local_file)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServiceDiscovery {
    pub fn builder(api_root: impl Into<String>) -> ServiceDiscoveryBuilder {
        ServiceDiscoveryBuilder::new(api_root.into())
    }

    pub fn from_config(config: &DiscoveryConfig) -> ServiceDiscoveryBuilder {
        let mut builder = Self::builder(config.api_root.clone())
            .storage_dir(config.storage_dir.clone())
            .request_timeout(config.request_timeout());
        if let Some(token) = &config.bearer_token {
            builder = builder.bearer_token(token.clone());
        }
        if let Some(path) = &config.local_file {
            builder = builder.local_file(path.clone());
        }
        builder
    }

    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    pub fn state(&self) -> DiscoveryState {
        *self.state.read()
    }

    /// When the document was last replaced.
    pub fn last_updated(&self) -> Option<Instant> {
        *self.last_updated.read()
    }

    pub fn resource(&self) -> Option<Arc<HalResource>> {
        self.resource.load_full()
    }

    /// Loads the document from the best available source: the local file
    /// when one is configured; otherwise the network when the current
    /// document is missing or older than [`LOCAL_CACHE_MAX_AGE`]; otherwise
    /// the persisted snapshot, falling back to the network.
    pub async fn load(&self) -> Result<(), DiscoveryError> {
        let _writer = self.writer.lock().await;
        self.set_state(DiscoveryState::Loading);
        let result = self.load_from_best_source().await;
        self.settle();
        result
    }

    /// Fetches a fresh document unless the current one was updated less than
    /// [`REFRESH_GUARD`] ago. A failed refresh keeps the current document.
    pub async fn refresh_service_discovery_if_necessary(&self) -> Result<(), DiscoveryError> {
        let _writer = self.writer.lock().await;
        if self.updated_within(REFRESH_GUARD) {
            debug!("service discovery is up to date");
            return Err(DiscoveryError::DiscoveryIsUpToDate);
        }
        self.set_state(DiscoveryState::Loading);
        let result = self.fetch_and_store().await;
        self.settle();
        result
    }

    async fn load_from_best_source(&self) -> Result<(), DiscoveryError> {
        if let Some(path) = &self.local_file {
            info!(path = %path.display(), "loading service discovery from file");
            let data = tokio::fs::read(path)
                .await
                .map_err(|_| DiscoveryError::FileNotFound(path.clone()))?;
            self.store(HalResource::from_json(&data, Some(&self.api_root))?);
            return Ok(());
        }

        if self.updated_within(LOCAL_CACHE_MAX_AGE) {
            match self.load_persisted().await {
                Ok(Some(resource)) => {
                    info!("loaded service discovery from local snapshot");
                    self.store(resource);
                    return Ok(());
                }
                Ok(None) => debug!("no local service discovery snapshot"),
                Err(err) => warn!(error = %err, "failed to read local service discovery snapshot"),
            }
        }

        info!(root = %self.api_root, "loading service discovery from server");
        self.fetch_and_store().await
    }

    async fn fetch_and_store(&self) -> Result<(), DiscoveryError> {
        let data = self.fetcher.fetch().await?;
        let resource = HalResource::from_json(&data, Some(&self.api_root))?;
        self.persist(&resource).await;
        self.store(resource);
        Ok(())
    }

    async fn load_persisted(&self) -> Result<Option<HalResource>, DiscoveryError> {
        let persistence = Arc::clone(&self.persistence);
        tokio::task::spawn_blocking(move || persistence.load())
            .await
            .map_err(|err| DiscoveryError::Persistence(err.to_string()))?
    }

    async fn persist(&self, resource: &HalResource) {
        let persistence = Arc::clone(&self.persistence);
        let resource = resource.clone();
        let saved = tokio::task::spawn_blocking(move || persistence.save(&resource))
            .await
            .map_err(|err| DiscoveryError::Persistence(err.to_string()))
            .and_then(|saved| saved);
        if let Err(err) = saved {
            warn!(error = %err, "failed to persist service discovery");
        }
    }

    /// Replaces the document and resets the staleness clock.
    pub(crate) fn store(&self, resource: HalResource) {
        debug!(relations = resource.relation_names().count(), "replacing service discovery document");
        self.resource.store(Some(Arc::new(resource)));
        *self.last_updated.write() = Some(Instant::now());
    }

    fn updated_within(&self, window: Duration) -> bool {
        self.last_updated().is_some_and(|updated| updated.elapsed() < window)
    }

    fn set_state(&self, state: DiscoveryState) {
        *self.state.write() = state;
    }

    fn settle(&self) {
        let state = if self.resource.load().is_some() {
            DiscoveryState::Ready
        } else {
            DiscoveryState::Uninitialized
        };
        self.set_state(state);
    }

    fn base_url(&self) -> Url {
        self.resource()
            .and_then(|resource| resource.homepage().cloned())
            .unwrap_or_else(|| self.api_root.clone())
    }

    /// Resolves `name` through the overlay, then the document, then the
    /// underlay, expanding the first match with `variables`.
    pub fn url_for_entry_relation_named(&self, name: &str, variables: Option<&Map<String, Value>>) -> Option<Url> {
        let empty = Map::new();
        let variables = variables.unwrap_or(&empty);
        let base = self.base_url();

        if let Some(template) = self.overlay.read().get(name) {
            return base.join(&template.expand(variables)).ok();
        }
        if let Some(link) = self.resource().as_ref().and_then(|resource| resource.link(name).cloned()) {
            return link.url(variables, &base);
        }
        self.underlay
            .read()
            .get(name)
            .and_then(|template| base.join(&template.expand(variables)).ok())
    }

    pub fn has_url_for_entry_relation_named(&self, name: &str) -> bool {
        self.overlay.read().contains_key(name)
            || self.resource().is_some_and(|resource| resource.link(name).is_some())
            || self.underlay.read().contains_key(name)
    }

    /// Variable names declared by whichever tier resolves `name`.
    pub fn url_variable_names_for_entry_relation_named(&self, name: &str) -> Option<Vec<String>> {
        if let Some(template) = self.overlay.read().get(name) {
            return Some(template.variable_names());
        }
        if let Some(names) = self
            .resource()
            .and_then(|resource| resource.link(name).map(HalLink::variable_names))
        {
            return Some(names);
        }
        self.underlay.read().get(name).map(UriTemplate::variable_names)
    }

    /// Resolves a link URI carried by a fetched resource, relative to the
    /// document's homepage.
    pub fn url_for_hal_link(&self, uri: &str, variables: Option<&Map<String, Value>>) -> Option<Url> {
        let template = UriTemplate::parse(uri).ok()?;
        let empty = Map::new();
        self.base_url()
            .join(&template.expand(variables.unwrap_or(&empty)))
            .ok()
    }

    pub fn set_service_discovery_overlay_entry_relation(&self, name: &str, uri_template: &str) -> Result<(), DiscoveryError> {
        let template = parse_entry(name, uri_template)?;
        self.overlay.write().insert(name.to_string(), template);
        Ok(())
    }

    pub fn remove_service_discovery_overlay_entry_relation(&self, name: &str) {
        self.overlay.write().remove(name);
    }

    pub fn set_service_discovery_underlay_entry_relation(&self, name: &str, uri_template: &str) -> Result<(), DiscoveryError> {
        let template = parse_entry(name, uri_template)?;
        self.underlay.write().insert(name.to_string(), template);
        Ok(())
    }

    pub fn remove_service_discovery_underlay_entry_relation(&self, name: &str) {
        self.underlay.write().remove(name);
    }
}

fn parse_entry(name: &str, uri_template: &str) -> Result<UriTemplate, DiscoveryError> {
    UriTemplate::parse(uri_template).map_err(|source| {
        warn!(relation = %name, template = %uri_template, error = %source, "rejecting invalid URI template");
        DiscoveryError::InvalidTemplate {
            name: name.to_string(),
            source,
        }
    })
}

pub struct ServiceDiscoveryBuilder {
    api_root: String,
    bearer_token: Option<String>,
    storage_dir: Option<PathBuf>,
    local_file: Option<PathBuf>,
    request_timeout: Duration,
    fetcher: Option<Arc<dyn DiscoveryFetcher>>,
    persistence: Option<Arc<dyn DiscoveryPersistence>>,
    executor: Option<Arc<dyn Executor>>,
}

impl ServiceDiscoveryBuilder {
    fn new(api_root: String) -> Self {
        Self {
            api_root,
            bearer_token: None,
            storage_dir: None,
            local_file: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            fetcher: None,
            persistence: None,
            executor: None,
        }
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Always load from this file instead of the network.
    pub fn local_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_file = Some(path.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replaces the HTTP fetcher; `bearer_token`, `request_timeout` and
    /// `executor` are then unused.
    pub fn fetcher(mut self, fetcher: Arc<dyn DiscoveryFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replaces the file snapshot; `storage_dir` is then unused.
    pub fn persistence(mut self, persistence: Arc<dyn DiscoveryPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Fails when the root is not a URL. A `file://` root implies
    /// [`local_file`](Self::local_file).
    pub fn build(self) -> Result<Arc<ServiceDiscovery>, DiscoveryError> {
        let api_root = Url::parse(&self.api_root).map_err(|_| DiscoveryError::InvalidApiRoot(self.api_root.clone()))?;

        let local_file = match self.local_file {
            Some(path) => Some(path),
            None if api_root.scheme() == "file" => Some(
                api_root
                    .to_file_path()
                    .map_err(|()| DiscoveryError::InvalidApiRoot(self.api_root.clone()))?,
            ),
            None => None,
        };

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let executor = self
                    .executor
                    .unwrap_or_else(|| Arc::new(UreqExecutor::new(Some(self.request_timeout))));
                Arc::new(HttpDiscoveryFetcher::new(
                    api_root.clone(),
                    self.bearer_token,
                    self.request_timeout,
                    executor,
                ))
            }
        };
        let persistence = match self.persistence {
            Some(persistence) => persistence,
            None => {
                let dir = self.storage_dir.unwrap_or_else(default_storage_dir);
                Arc::new(FilePersistence::for_root(dir, &api_root))
            }
        };

        Ok(Arc::new(ServiceDiscovery {
            api_root,
            local_file,
            fetcher,
            persistence,
            resource: ArcSwapOption::empty(),
            last_updated: RwLock::new(None),
            state: RwLock::new(DiscoveryState::Uninitialized),
            overlay: RwLock::new(HashMap::new()),
            underlay: RwLock::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(()),
        }))
    }
}
