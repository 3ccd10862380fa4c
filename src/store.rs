use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted verdict cache collection
pub const CACHE_KEY: &str = "urlhaus_cache";
/// Stored URLhaus API credential
pub const API_KEY_KEY: &str = "urlhaus_api_key";
/// Confusable rule collection
pub const RULES_KEY: &str = "urlhaus_confusable_rules";
/// Domain-only normalization flag
pub const DOMAIN_ONLY_KEY: &str = "urlhaus_domain_only";

/// Keyed blob storage shared by the cache, rule store and settings.
///
/// Every blob is read and written whole. Implementations only need to make a
/// single `write` atomic; read-modify-write sequences are serialized by the
/// owning component.
pub trait StateStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Value>>;
    fn write(&self, key: &str, value: Value) -> Result<()>;
}

/// Read a blob and deserialize it. A blob that no longer matches the expected
/// shape is reported and treated as absent.
pub fn load_blob<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>> {
    match store.read(key)? {
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                log::warn!("Ignoring unreadable stored value for {key}: {e}");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub fn save_blob<T: Serialize + ?Sized>(store: &dyn StateStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)
        .with_context(|| format!("Failed to serialize stored value for {key}"))?;
    store.write(key, value)
}

/// In-memory store, used by tests and as a scratch backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Value>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(blobs.get(key).cloned())
    }

    fn write(&self, key: &str, value: Value) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        blobs.insert(key.to_string(), value);
        Ok(())
    }
}

/// All blobs in a single JSON object on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                log::warn!(
                    "State file {} is not a JSON object, starting empty",
                    self.path.display()
                );
                Ok(Map::new())
            }
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory: {}", parent.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

impl StateStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        Ok(self.read_all()?.remove(key))
    }

    fn write(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);
        self.write_all(&map)
    }
}
