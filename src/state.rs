//! Workspace-scoped state storage.
//!
//! The host keeps a small key/value store per workspace that survives
//! restarts. Values are JSON. Two backends are provided:
//! - [`JsonStateStore`], a single JSON object on disk
//! - [`MemoryStateStore`], for tests and ephemeral hosts

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StateError;

/// Result type for state store operations.
pub type StateResult<T> = std::result::Result<T, StateError>;

/// A durable key/value store scoped to one workspace.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a value. Returns `None` if the key was never written or was cleared.
    async fn get(&self, key: &str) -> StateResult<Option<Value>>;

    /// Writes a value. `None` removes the key.
    async fn update(&self, key: &str, value: Option<Value>) -> StateResult<()>;
}

/// State store persisted as one JSON object in a file.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    /// Creates a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StateResult<Map<String, Value>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(StateError::Io(e)),
        }
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn get(&self, key: &str) -> StateResult<Option<Value>> {
        debug!(path = %self.path.display(), key, "reading workspace state");
        let mut entries = self.load().await?;
        Ok(entries.remove(key))
    }

    async fn update(&self, key: &str, value: Option<Value>) -> StateResult<()> {
        let _guard = self.write_lock.lock().await;
        debug!(path = %self.path.display(), key, "writing workspace state");

        let mut entries = match (self.load().await, &value) {
            (Ok(entries), _) => entries,
            // clearing a key always succeeds, even over a corrupted file
            (Err(StateError::Corrupted(e)), None) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupted workspace state");
                Map::new()
            }
            (Err(e), _) => return Err(e),
        };
        match value {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically (temp file + rename)
        let content = serde_json::to_string_pretty(&Value::Object(entries))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

/// In-memory state store. Not persistent.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, Value>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> StateResult<Option<Value>> {
        let data = self
            .data
            .read()
            .map_err(|e| StateError::LockPoisoned(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    async fn update(&self, key: &str, value: Option<Value>) -> StateResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StateError::LockPoisoned(e.to_string()))?;
        match value {
            Some(value) => data.insert(key.to_string(), value),
            None => data.remove(key),
        };
        Ok(())
    }
}
