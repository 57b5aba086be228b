//! Editor settings for the TRLC client.
//!
//! Settings live in a JSON file with flat dotted keys, the way an editor's
//! `settings.json` stores them. Unknown keys are ignored and a missing file
//! means defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lsp::types::{DEFAULT_DOCUMENT_PATTERNS, DEFAULT_WATCH_PATTERN, DocumentSelector, compile_glob};
use crate::provision::{DEFAULT_PACKAGE, PackageSpec};

/// Default tracker reference pattern. The first capture group is the item id.
pub const DEFAULT_ITEM_PATTERN: &str = r"\bcb_id\s*=\s*(\d+)";

/// User and workspace settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Python interpreter that runs the server.
    #[serde(rename = "python.defaultInterpreterPath")]
    pub interpreter_path: Option<String>,

    /// Glob of workspace files whose changes are forwarded to the server.
    #[serde(rename = "trlc.fileWatchPattern")]
    pub file_watch_pattern: String,

    /// Globs of documents the server handles.
    #[serde(rename = "trlc.documentPatterns")]
    pub document_patterns: Vec<String>,

    /// Bound on the server handshake.
    #[serde(rename = "trlc.initTimeoutSecs")]
    pub init_timeout_secs: u64,

    /// Bound on each request.
    #[serde(rename = "trlc.requestTimeoutSecs")]
    pub request_timeout_secs: u64,

    /// Wait for server exit before killing it.
    #[serde(rename = "trlc.shutdownGraceSecs")]
    pub shutdown_grace_secs: u64,

    /// Package installed into the private dependency directory.
    #[serde(rename = "trlc.dependencyPackage")]
    pub dependency_package: String,

    /// Interpreter for the sanity check script. Falls back to the server's.
    #[serde(rename = "trlcTools.sanityChecks.interpreter")]
    pub sanity_interpreter: Option<String>,

    /// Sanity check script, run with the workspace root as its argument.
    #[serde(rename = "trlcTools.sanityChecks.script")]
    pub sanity_script: Option<PathBuf>,

    /// Base URL of the issue tracker. Lookups are disabled when unset.
    #[serde(rename = "trlcTools.tracker.baseUrl")]
    pub tracker_base_url: Option<String>,

    /// Regex finding tracker references in documents.
    #[serde(rename = "trlcTools.tracker.itemPattern")]
    pub tracker_item_pattern: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interpreter_path: None,
            file_watch_pattern: DEFAULT_WATCH_PATTERN.to_string(),
            document_patterns: DEFAULT_DOCUMENT_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            init_timeout_secs: 30,
            request_timeout_secs: 10,
            shutdown_grace_secs: 2,
            dependency_package: DEFAULT_PACKAGE.to_string(),
            sanity_interpreter: None,
            sanity_script: None,
            tracker_base_url: None,
            tracker_item_pattern: DEFAULT_ITEM_PATTERN.to_string(),
        }
    }
}

impl Settings {
    /// Loads and validates settings from `path`. A missing file yields defaults.
    ///
    /// # Errors
    /// [`ConfigError::InvalidSettings`] if the file cannot be read or parsed,
    /// [`ConfigError::InvalidPattern`] if a glob or regex is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let settings: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Checks every pattern and the package spec.
    ///
    /// # Errors
    /// The first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        compile_glob("trlc.fileWatchPattern", &self.file_watch_pattern)?;
        DocumentSelector::new(&self.document_patterns)?;
        regex::Regex::new(&self.tracker_item_pattern).map_err(|e| ConfigError::InvalidPattern {
            setting: "trlcTools.tracker.itemPattern",
            message: e.to_string(),
        })?;
        self.package()?;
        Ok(())
    }

    /// The configured dependency package.
    ///
    /// # Errors
    /// [`ConfigError::InvalidPattern`] if it is not `name==version`.
    pub fn package(&self) -> Result<PackageSpec, ConfigError> {
        self.dependency_package
            .parse()
            .map_err(|e: crate::error::ProvisionError| ConfigError::InvalidPattern {
                setting: "trlc.dependencyPackage",
                message: e.to_string(),
            })
    }

    /// Handshake bound.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    /// Request bound.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Interpreter for sanity checks: the dedicated one, else the server's.
    pub fn sanity_interpreter(&self) -> Option<&str> {
        self.sanity_interpreter
            .as_deref()
            .or(self.interpreter_path.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    /// Writes default settings to `path`.
    ///
    /// Written atomically (temp file + rename). Refuses to overwrite.
    ///
    /// # Errors
    /// [`ConfigError::InvalidSettings`] if the file exists or cannot be written.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        let fail = |message: String| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            message,
        };

        if path.exists() {
            return Err(fail(
                "settings file already exists; remove it first to regenerate".to_string(),
            ));
        }

        let json = serde_json::to_string_pretty(&Self::default())
            .map_err(|e| fail(format!("failed to serialize settings: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| fail(format!("failed to create settings directory: {e}")))?;
        }

        let temp_file = path.with_extension("tmp");
        fs::write(&temp_file, json)
            .map_err(|e| fail(format!("failed to write temporary settings file: {e}")))?;
        fs::rename(&temp_file, path)
            .map_err(|e| fail(format!("failed to rename temporary settings file: {e}")))?;

        Ok(())
    }
}
