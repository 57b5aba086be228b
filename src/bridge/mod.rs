//! Dependent extension bridge.
//!
//! A second extension that layers tracker-oriented features over the TRLC
//! extension's capability API. It finds the primary by its stable id,
//! activates it if needed, and composes:
//!
//! - `decorations`: tracker references annotated with server hover text
//! - `lookup`: tracker item summaries fetched over HTTP
//! - `sanity`: an external workspace sanity check run in the background
//!
//! A missing or broken primary only disables these features.

pub mod decorations;
pub mod lookup;
pub mod sanity;

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{PRIMARY_EXTENSION_ID, TrlcApi};
use crate::config::Settings;
use crate::error::{BridgeError, ConfigError};
use crate::host::{ExtensionEntry, ExtensionRegistry};

pub use decorations::{Decoration, DecorationProvider};
pub use lookup::{TrackerItem, TrackerLookup};
pub use sanity::{Finding, SanityCheckRunner, SanityReport};

/// Identifier of the dependent extension.
pub const DEPENDENT_EXTENSION_ID: &str = "trlc.trlc-tools";

/// Compiled tracker reference pattern.
///
/// The first capture group is the item id; without one the whole match is.
#[derive(Debug, Clone)]
pub struct ItemPattern(Regex);

impl ItemPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    /// [`ConfigError::InvalidPattern`] if the regex is malformed.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| ConfigError::InvalidPattern {
                setting: "trlcTools.tracker.itemPattern",
                message: e.to_string(),
            })
    }

    /// Byte span of each reference and the item id it names.
    pub fn find<'a>(&'a self, text: &'a str) -> impl Iterator<Item = (Range<usize>, &'a str)> {
        self.0.captures_iter(text).filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(1).unwrap_or(whole);
            Some((whole.range(), id.as_str()))
        })
    }
}

/// Features built on top of a live primary extension.
pub struct ComposedFeatures {
    /// The primary's capability API.
    pub api: Arc<dyn TrlcApi>,
    /// Reference decorations.
    pub decorations: DecorationProvider,
    /// Tracker lookups, when a tracker is configured.
    pub lookup: Option<TrackerLookup>,
    /// Background sanity check, when a script and a workspace are available.
    pub sanity: Option<JoinHandle<Option<SanityReport>>>,
}

impl std::fmt::Debug for ComposedFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedFeatures")
            .field("decorations", &self.decorations)
            .field("lookup", &self.lookup)
            .field("sanity", &self.sanity.is_some())
            .finish_non_exhaustive()
    }
}

/// The dependent extension.
#[derive(Debug, Clone)]
pub struct DependentExtension {
    settings: Settings,
    workspace_root: Option<PathBuf>,
}

impl DependentExtension {
    /// Creates the extension for an optional workspace.
    pub fn new(settings: Settings, workspace_root: Option<PathBuf>) -> Self {
        Self {
            settings,
            workspace_root,
        }
    }

    /// Finds the primary extension.
    ///
    /// # Errors
    /// [`BridgeError::ExtensionNotFound`] if it is not installed.
    pub fn locate_primary(registry: &ExtensionRegistry) -> Result<Arc<ExtensionEntry>, BridgeError> {
        registry
            .get(PRIMARY_EXTENSION_ID)
            .ok_or_else(|| BridgeError::ExtensionNotFound(PRIMARY_EXTENSION_ID.to_string()))
    }

    /// Sanity check runner, when a script is configured.
    pub fn sanity_runner(&self) -> Option<SanityCheckRunner> {
        let script = self.settings.sanity_script.clone()?;
        let interpreter = self
            .settings
            .sanity_interpreter()
            .unwrap_or(if cfg!(windows) { "python" } else { "python3" });
        Some(SanityCheckRunner::new(interpreter, script))
    }

    /// Activates the primary and composes the dependent features.
    ///
    /// Returns `None`, after logging, if the primary is absent or fails to
    /// activate. Never panics or propagates.
    pub async fn discover_and_compose(&self, registry: &ExtensionRegistry) -> Option<ComposedFeatures> {
        let entry = match Self::locate_primary(registry) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "TRLC extension is not installed, tracker features are disabled");
                return None;
            }
        };

        let api = match entry.activate().await {
            Ok(api) => api,
            Err(e) => {
                error!(error = %e, "TRLC extension failed to activate");
                return None;
            }
        };

        let pattern = match ItemPattern::new(&self.settings.tracker_item_pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                error!(error = %e, "tracker features are disabled");
                return None;
            }
        };

        let lookup = self
            .settings
            .tracker_base_url
            .as_ref()
            .map(|url| TrackerLookup::new(url.clone(), pattern.clone()));

        let sanity = match (self.sanity_runner(), &self.workspace_root) {
            (Some(runner), Some(root)) => Some(runner.spawn_detached(root.clone())),
            _ => None,
        };

        info!(
            api_version = api.api_version(),
            tracker = lookup.is_some(),
            sanity_checks = sanity.is_some(),
            "tracker features ready"
        );

        Some(ComposedFeatures {
            decorations: DecorationProvider::new(api.clone(), pattern),
            api,
            lookup,
            sanity,
        })
    }
}
