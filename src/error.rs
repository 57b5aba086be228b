//! Error types for the TRLC language client.
//!
//! Errors are organized by subsystem: provisioning, launch configuration,
//! the LSP session, persisted state, and the dependent extension bridge.
//! Only [`StartupError`] ever reaches the host as a user-facing failure; the
//! rest are absorbed where they occur and turned into log records or empty
//! results.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing the workspace state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backing file could not be read or written.
    #[error("state store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file does not contain a JSON object.
    #[error("state store is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),

    /// An in-memory lock was poisoned by a panicking writer.
    #[error("state store lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Errors from the one-time dependency provisioning step.
///
/// Never fatal: the next activation retries.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The package manager could not be started at all.
    #[error("failed to run package installer '{program}': {source}")]
    InstallerUnavailable {
        /// The program that was invoked.
        program: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The package manager ran and reported failure.
    #[error("installing {package} failed (exit code {code:?}): {stderr}")]
    InstallFailed {
        /// The `name==version` spec that was requested.
        package: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Diagnostic text from standard error.
        stderr: String,
    },

    /// The provisioning flag could not be read or persisted.
    #[error("provisioning state unavailable: {0}")]
    State(#[from] StateError),

    /// A package spec did not have the `name==version` shape.
    #[error("invalid package spec '{0}', expected name==version")]
    InvalidPackageSpec(String),
}

/// Errors in the configuration needed to start the server.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `python.defaultInterpreterPath` is missing or blank.
    #[error("`python.defaultInterpreterPath` is not set")]
    InterpreterNotSet,

    /// The client entry directory is too shallow to derive a working directory.
    #[error("cannot derive server working directory from '{0}'")]
    NoWorkingDirectory(PathBuf),

    /// A glob or regex setting does not compile.
    #[error("invalid pattern in setting '{setting}': {message}")]
    InvalidPattern {
        /// The settings key holding the pattern.
        setting: &'static str,
        /// Why the pattern was rejected.
        message: String,
    },

    /// The settings file exists but cannot be used.
    #[error("invalid settings file '{path}': {message}")]
    InvalidSettings {
        /// Path of the settings file.
        path: PathBuf,
        /// Why it was rejected.
        message: String,
    },
}

/// Errors related to the language client session.
#[derive(Debug, Error)]
pub enum LspError {
    /// The language server process failed to start.
    #[error("failed to start language server: {0}")]
    ServerStartFailed(String),

    /// The initialize/initialized handshake failed.
    #[error("language server initialization failed: {0}")]
    InitializationFailed(String),

    /// A request or the handshake exceeded its time bound.
    #[error("language server request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An operation was attempted while the session was not running.
    #[error("language client is not running (state: {state})")]
    NotRunning {
        /// Name of the state the session was in.
        state: &'static str,
    },

    /// `start` was called on a session that has already stopped.
    #[error("language client session has stopped and cannot be restarted")]
    SessionStopped,

    /// Failed to send a request or notification to the language server.
    #[error("failed to send request to language server: {0}")]
    RequestFailed(String),

    /// The document is outside the client's document selector or unreadable.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The file watch could not be installed.
    #[error("failed to watch workspace files: {0}")]
    WatchFailed(String),

    /// Invalid position in document.
    #[error("invalid position: line {line}, column {column}")]
    InvalidPosition {
        /// The line number.
        line: u32,
        /// The column number.
        column: u32,
    },
}

impl LspError {
    /// Whether this error means the server never completed its handshake.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            Self::ServerStartFailed(_) | Self::InitializationFailed(_) | Self::Timeout(_)
        )
    }
}

/// Why the primary extension came up without a running client.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The launch configuration is incomplete.
    #[error("cannot start TRLC language server: {0}")]
    Config(#[from] ConfigError),

    /// The server could not be spawned or did not complete its handshake.
    #[error("TRLC language server failed to start: {0}")]
    Handshake(#[from] LspError),
}

/// Errors from running external tools on behalf of the dependent extension.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    /// The tool process could not be spawned.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        /// The program that was invoked.
        program: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully without usable output.
    #[error("'{program}' failed (exit code {code:?}): {stderr}")]
    Failed {
        /// The program that was invoked.
        program: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Diagnostic text from standard error.
        stderr: String,
    },

    /// The tool produced output that could not be parsed.
    #[error("unexpected output from external tool: {0}")]
    InvalidOutput(String),

    /// The tool did not finish in time.
    #[error("external tool timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An HTTP request to the tracker failed.
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The tracker answered with a non-success status.
    #[error("tracker returned status {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The requested URL.
        url: String,
    },
}

/// Errors from locating and activating the primary extension.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No extension is registered under the identifier.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// The extension was found but its activation failed.
    #[error("activation of '{id}' failed: {message}")]
    ActivationFailed {
        /// Identifier of the extension.
        id: String,
        /// Why activation failed.
        message: String,
    },
}

/// A unified error type for the entire crate.
#[derive(Debug, Error)]
pub enum Error {
    /// LSP session error.
    #[error("LSP error: {0}")]
    Lsp(#[from] LspError),

    /// Provisioning error.
    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State store error.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Startup error.
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Bridge error.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// External tool error.
    #[error("external tool error: {0}")]
    ExternalTool(#[from] ExternalToolError),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for trlc-client operations.
pub type Result<T> = std::result::Result<T, Error>;
