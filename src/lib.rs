//! TRLC language client supervisor
//!
//! Provisions, launches and supervises the TRLC language server (a Python
//! module speaking LSP over stdio), and exposes a small capability API that
//! a dependent extension builds tracker features on.
//!
//! # Overview
//!
//! This library provides:
//! - One-time dependency provisioning recorded in a workspace state store
//! - Launch descriptor derivation for development and production modes
//! - A language client session with a strict lifecycle
//! - A capability facade and the dependent extension bridge
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  TrlcApi   ┌──────────────────┐
//! │ Dependent bridge │◄──────────►│  TRLC extension  │
//! │ (trlc-tools)     │            │  (activation)    │
//! └──────────────────┘            └────────┬─────────┘
//!                                          │
//!                                   ┌──────▼──────┐
//!                                   │  LSP client │
//!                                   │   session   │
//!                                   └──────┬──────┘
//!                                          │ JSON-RPC over stdio
//!                                   ┌──────▼──────┐
//!                                   │ python -m   │
//!                                   │   server    │
//!                                   └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`error`] - Error types for the entire crate
//! - [`provision`] - Dependency provisioning
//! - [`launch`] - Server launch descriptors
//! - [`lsp`] - Language client session
//! - [`api`] - Capability facade
//! - [`extension`] - The TRLC extension
//! - [`bridge`] - The dependent extension
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trlc_client::{config::Settings, extension::TrlcExtension, host::ExtensionContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let extension = TrlcExtension::builder(context, Settings::load(path)?).build()?;
//!     let activation = extension.activate().await;
//!     let hover = activation.api().hover_details(uri, position).await;
//!     extension.deactivate().await;
//!     Ok(())
//! }
//! ```

// Enforce documentation and other quality attributes
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are too strict
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod extension;
pub mod host;
pub mod launch;
pub mod lsp;
pub mod provision;
pub mod state;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
