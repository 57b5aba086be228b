//! Derives how to start the TRLC language server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Python module that hosts the server entry point.
pub const SERVER_MODULE: &str = "server";

/// How the host is running the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Running from a source checkout.
    Development,
    /// Running from an installed package.
    #[default]
    Production,
}

/// Command line used to spawn the server. Built fresh on each activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    /// Executable to run.
    pub command: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory of the server process.
    pub working_directory: PathBuf,
}

/// Builds the launch descriptor for `mode`.
///
/// `root_directory` is the compiled client entry directory
/// (`<extension>/client/out`); the server runs two levels above it, at the
/// extension root, where it finds its private dependency directory.
///
/// # Errors
/// [`ConfigError::InterpreterNotSet`] when no interpreter is configured, and
/// [`ConfigError::NoWorkingDirectory`] when `root_directory` is too shallow.
pub fn build_launch_descriptor(
    mode: ExecutionMode,
    root_directory: &Path,
    interpreter_path: Option<&str>,
) -> Result<LaunchDescriptor, ConfigError> {
    let interpreter = interpreter_path
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::InterpreterNotSet)?;

    let working_directory = root_directory
        .ancestors()
        .nth(2)
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| ConfigError::NoWorkingDirectory(root_directory.to_path_buf()))?
        .to_path_buf();

    let args: &[&str] = match mode {
        ExecutionMode::Development => &["-m", SERVER_MODULE],
        ExecutionMode::Production => &["-O", "-m", SERVER_MODULE],
    };

    Ok(LaunchDescriptor {
        command: PathBuf::from(interpreter),
        args: args.iter().map(|a| (*a).to_string()).collect(),
        working_directory,
    })
}
