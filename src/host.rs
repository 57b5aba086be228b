//! The seam between extensions and the editor host.
//!
//! The host hands each extension an [`ExtensionContext`] and keeps a
//! registry of installed extensions so they can find each other by id.
//! Activation through the registry happens at most once per extension.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::api::TrlcApi;
use crate::error::BridgeError;
use crate::launch::ExecutionMode;
use crate::state::StateStore;

/// What the host provides to an activating extension.
#[derive(Clone)]
pub struct ExtensionContext {
    /// Install directory of the extension.
    pub extension_path: PathBuf,
    /// Development or production.
    pub mode: ExecutionMode,
    /// Open workspace folder, if any.
    pub workspace_root: Option<PathBuf>,
    /// Workspace-scoped durable key/value store.
    pub workspace_state: Arc<dyn StateStore>,
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("extension_path", &self.extension_path)
            .field("mode", &self.mode)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

/// An installed extension that exports a [`TrlcApi`].
#[async_trait]
pub trait Extension: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> &str;

    /// Activates the extension and returns its exported API.
    ///
    /// # Errors
    /// [`BridgeError::ActivationFailed`] if the extension cannot export an API.
    async fn activate(&self) -> Result<Arc<dyn TrlcApi>, BridgeError>;
}

/// A registered extension plus its activation result.
pub struct ExtensionEntry {
    extension: Arc<dyn Extension>,
    exports: OnceCell<Arc<dyn TrlcApi>>,
}

impl ExtensionEntry {
    fn new(extension: Arc<dyn Extension>) -> Self {
        Self {
            extension,
            exports: OnceCell::new(),
        }
    }

    /// Identifier of the wrapped extension.
    pub fn id(&self) -> &str {
        self.extension.id()
    }

    /// Whether [`ExtensionEntry::activate`] has completed successfully.
    pub fn is_active(&self) -> bool {
        self.exports.initialized()
    }

    /// Activates on first call; later calls return the same API object.
    ///
    /// # Errors
    /// Propagates the extension's activation error. A failed activation is
    /// retried on the next call.
    pub async fn activate(&self) -> Result<Arc<dyn TrlcApi>, BridgeError> {
        self.exports
            .get_or_try_init(|| async {
                debug!(id = self.id(), "activating extension");
                self.extension.activate().await
            })
            .await
            .cloned()
    }
}

/// Installed extensions, looked up by id.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: HashMap<String, Arc<ExtensionEntry>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `extension`, replacing any previous one with the same id.
    pub fn register(&mut self, extension: Arc<dyn Extension>) -> Arc<ExtensionEntry> {
        let entry = Arc::new(ExtensionEntry::new(extension));
        self.entries.insert(entry.id().to_string(), entry.clone());
        entry
    }

    /// Finds an installed extension.
    pub fn get(&self, id: &str) -> Option<Arc<ExtensionEntry>> {
        self.entries.get(id).cloned()
    }

    /// Number of installed extensions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
