//! Language client session for the TRLC server.
//!
//! The session owns one server process and the JSON-RPC channel to it.
//!
//! # Architecture
//!
//! The LSP module is organized into:
//! - `client`: The session state machine and its request surface
//! - `process`: Spawning and supervising the server process
//! - `watch`: Forwarding workspace file changes to the server
//! - `types`: Conversions and document selection helpers
//!
//! # Usage
//!
//! ```ignore
//! use trlc_client::lsp::LanguageClientSession;
//!
//! let session = LanguageClientSession::builder().workspace_root(".").build()?;
//! session.start(&descriptor).await?;
//! ```

pub mod client;
pub mod process;
pub mod types;
pub mod watch;

use crate::error::LspError;

/// Result type for LSP operations.
pub type LspResult<T> = std::result::Result<T, LspError>;

pub use client::{LanguageClientSession, SessionBuilder, SessionConfig, SessionStatus};
pub use process::{LaunchedServer, Launcher, ProcessLauncher, ServerProcess};

// Re-export the protocol types callers of the facade need
pub use lsp_types::{Hover, HoverContents, Position, Url};
