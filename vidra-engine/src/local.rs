//! Local persistence port
//!
//! The engine keeps two things across reloads: the per-session identifier
//! and the offline analytics queue. Both go through [`LocalStore`], a
//! string key/value port the embedding platform backs with whatever it
//! has (web storage in a browser). The JSON file implementation serves
//! the runner binary; the in-memory one serves tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

/// String key/value storage scoped to the embedding page
///
/// All operations are best-effort: storage failures degrade to "not
/// persisted", never to an engine error.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Volatile store for tests and storage-less embeddings
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }
}

/// File-backed store holding one JSON object
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`. An unreadable or corrupt
    /// file starts empty rather than failing.
    pub fn open(path: &Path) -> Self {
        let cache = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            cache: Mutex::new(cache),
        }
    }

    fn persist(&self, cache: &BTreeMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(cache) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&self.path, content) {
                    warn!("Failed to persist local store {:?}: {}", self.path, e);
                }
            }
            Err(e) => warn!("Failed to encode local store: {}", e),
        }
    }
}

impl LocalStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(key.to_string(), value.to_string());
        self.persist(&cache);
    }

    fn remove(&self, key: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.remove(key);
        self.persist(&cache);
    }
}
