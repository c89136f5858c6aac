//! Local snapshot of the discovery document.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use url::Url;

use super::resource::HalResource;
use crate::error::DiscoveryError;

const FILE_NAME: &str = "discovery.json";

/// Blocking storage for the last fetched document. Called from tokio's
/// blocking pool.
pub trait DiscoveryPersistence: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<HalResource>, DiscoveryError>;

    fn save(&self, resource: &HalResource) -> Result<(), DiscoveryError>;
}

/// One JSON file per environment, at `<dir>/<host>/discovery.json`.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Keys the snapshot by the root's host so environments do not share it.
    pub fn for_root(storage_dir: impl AsRef<Path>, root: &Url) -> Self {
        let host = match (root.host_str(), root.port()) {
            (Some(host), Some(port)) => format!("{host}_{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => "local".to_string(),
        };
        Self::new(storage_dir.as_ref().join(host).join(FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiscoveryPersistence for FilePersistence {
    fn load(&self) -> Result<Option<HalResource>, DiscoveryError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(DiscoveryError::Persistence(err.to_string())),
        };
        HalResource::from_json(&data, None).map(Some)
    }

    fn save(&self, resource: &HalResource) -> Result<(), DiscoveryError> {
        let persistence_error = |err: &dyn std::fmt::Display| DiscoveryError::Persistence(err.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| persistence_error(&e))?;
        }
        let data = resource.to_json().map_err(|e| persistence_error(&e))?;
        fs::write(&self.path, data).map_err(|e| persistence_error(&e))
    }
}

/// In-memory snapshot, for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<HalResource>>,
}

impl MemoryPersistence {
    pub fn with_resource(resource: HalResource) -> Self {
        Self {
            snapshot: Mutex::new(Some(resource)),
        }
    }

    pub fn snapshot(&self) -> Option<HalResource> {
        self.snapshot.lock().clone()
    }
}

impl DiscoveryPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<HalResource>, DiscoveryError> {
        Ok(self.snapshot())
    }

    fn save(&self, resource: &HalResource) -> Result<(), DiscoveryError> {
        *self.snapshot.lock() = Some(resource.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::resource::HalLink;

    fn resource() -> HalResource {
        let mut resource = HalResource::new(Some(Url::parse("https://h/").unwrap()));
        resource.insert_link("account:x", HalLink::parse("https://h/accounts/{id}").unwrap());
        resource
    }

    #[test]
    fn path_is_keyed_by_host() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::for_root(dir.path(), &Url::parse("https://api.example.com/v1").unwrap());
        assert_eq!(persistence.path(), dir.path().join("api.example.com").join("discovery.json"));

        let local = FilePersistence::for_root(dir.path(), &Url::parse("http://127.0.0.1:8080/").unwrap());
        assert_eq!(local.path(), dir.path().join("127.0.0.1_8080").join("discovery.json"));
    }

    #[test]
    fn saved_snapshot_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::for_root(dir.path(), &Url::parse("https://h/").unwrap());
        persistence.save(&resource()).unwrap();

        assert_eq!(persistence.load().unwrap(), Some(resource()));
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::new(dir.path().join("nothing.json"));
        assert_eq!(persistence.load().unwrap(), None);
    }

    #[test]
    fn corrupt_snapshot_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        fs::write(&path, b"{ truncated").unwrap();
        assert_eq!(FilePersistence::new(path).load(), Err(DiscoveryError::ParsingFailed));
    }

    #[test]
    fn unwritable_location_is_a_persistence_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot be used as a directory.
        let persistence = FilePersistence::new(file.path().join("discovery.json"));
        assert!(matches!(persistence.save(&resource()), Err(DiscoveryError::Persistence(_))));
    }

    #[test]
    fn memory_persistence_keeps_last_save() {
        let persistence = MemoryPersistence::default();
        assert_eq!(persistence.load().unwrap(), None);
        persistence.save(&resource()).unwrap();
        assert_eq!(persistence.snapshot(), Some(resource()));
    }
}
