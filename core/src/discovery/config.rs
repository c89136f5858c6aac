//! Discovery settings and timing windows.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A refresh requested sooner than this after the last update is refused.
pub const REFRESH_GUARD: Duration = Duration::from_secs(5 * 60);

/// A document older than this is not trusted from the local snapshot.
pub const LOCAL_CACHE_MAX_AGE: Duration = Duration::from_secs(30 * 60);

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3_000;

const ENV_API_ROOT: &str = "DISCOVERY_API_ROOT";
const ENV_BEARER_TOKEN: &str = "DISCOVERY_BEARER_TOKEN";
const ENV_STORAGE_DIR: &str = "DISCOVERY_STORAGE_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub api_root: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Load from this file instead of the network.
    #[serde(default)]
    pub local_file: Option<PathBuf>,
}

impl DiscoveryConfig {
    pub fn new(api_root: impl Into<String>) -> Self {
        Self {
            api_root: api_root.into(),
            bearer_token: None,
            storage_dir: default_storage_dir(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            local_file: None,
        }
    }

    /// Reads `DISCOVERY_API_ROOT`, `DISCOVERY_BEARER_TOKEN` and
    /// `DISCOVERY_STORAGE_DIR`. `None` when no root is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let mut config = Self::new(lookup(ENV_API_ROOT).filter(|root| !root.is_empty())?);
        config.bearer_token = lookup(ENV_BEARER_TOKEN).filter(|token| !token.is_empty());
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            config.storage_dir = PathBuf::from(dir);
        }
        Some(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// `<cache dir>/hal-service`, or the temp dir where there is no cache dir.
pub fn default_storage_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("hal-service")
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
