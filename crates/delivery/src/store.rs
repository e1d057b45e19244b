//! Client-local key-value persistence. The only state that outlives a page
//! view lives here: frequency-cap counters, visitor identity, cached
//! experiment assignments.
//!
//! Writes from two tabs are not coordinated; the last writer wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use popup_core::{PopupError, PopupResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> PopupResult<()>;
    fn remove(&self, key: &str) -> PopupResult<()>;
}

/// Read a JSON value. Missing keys and undecodable values both read as
/// `None`; the latter is logged.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "discarding undecodable stored value");
            None
        }
    }
}

pub fn write_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> PopupResult<()> {
    store.set(key, serde_json::to_string(value)?)
}

/// In-memory store for tests and embedders that bring their own persistence.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: String) -> PopupResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> PopupResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Store persisted as one JSON object on disk, rewritten on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: DashMap<String, String>,
}

impl JsonFileStore {
    /// Open (or create on first write) the store at `path`. An unreadable
    /// file starts an empty store rather than failing the page view.
    pub fn open(path: impl AsRef<Path>) -> PopupResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = DashMap::new();
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(map) => {
                    for (k, v) in map {
                        entries.insert(k, v);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "state file corrupt, starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file yet");
            }
            Err(e) => return Err(PopupError::Io(e)),
        }
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> PopupResult<()> {
        let snapshot: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&self.path, bytes)
            .map_err(|e| PopupError::Storage(format!("{}: {e}", self.path.display())))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: String) -> PopupResult<()> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&self, key: &str) -> PopupResult<()> {
        self.entries.remove(key);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: u32,
    }

    #[test]
    fn test_memory_store_json_helpers() {
        let store = MemoryStore::new();
        assert!(read_json::<Counter>(&store, "k").is_none());
        write_json(&store, "k", &Counter { n: 3 }).unwrap();
        assert_eq!(read_json::<Counter>(&store, "k"), Some(Counter { n: 3 }));

        store.set("bad", "not json".into()).unwrap();
        assert!(read_json::<Counter>(&store, "bad").is_none());

        store.remove("k").unwrap();
        assert!(store.get("k").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        write_json(&store, "popup:fcap:a", &Counter { n: 1 }).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            read_json::<Counter>(&reopened, "popup:fcap:a"),
            Some(Counter { n: 1 })
        );
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{{{").unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get("anything").is_none());
    }
}
