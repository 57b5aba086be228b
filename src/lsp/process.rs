//! Spawning the language server process.
//!
//! The session never touches `async_process` directly; it asks a
//! [`Launcher`] for a byte stream pair and a [`ServerProcess`] handle. The
//! production launcher spawns the descriptor's command. Tests substitute an
//! in-process server.

use std::process::Stdio;

use async_trait::async_trait;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::{AsyncRead, AsyncWrite, StreamExt};
use tracing::debug;

use crate::error::LspError;
use crate::launch::LaunchDescriptor;

use super::LspResult;

/// Handle to a running server, used for supervision only.
#[async_trait]
pub trait ServerProcess: Send {
    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;

    /// Waits for the server to exit and returns its exit code.
    ///
    /// # Errors
    /// Returns an error if the exit status cannot be collected.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Forcibly terminates the server.
    ///
    /// # Errors
    /// Returns an error if the signal cannot be delivered.
    fn kill(&mut self) -> std::io::Result<()>;
}

/// A freshly spawned server: its protocol streams and its process handle.
pub struct LaunchedServer {
    /// Bytes from the server (its stdout).
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Bytes to the server (its stdin).
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Supervision handle.
    pub process: Box<dyn ServerProcess>,
}

impl std::fmt::Debug for LaunchedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedServer")
            .field("pid", &self.process.id())
            .finish_non_exhaustive()
    }
}

/// Starts servers from launch descriptors.
pub trait Launcher: Send + Sync {
    /// Spawns the server described by `descriptor`.
    ///
    /// # Errors
    /// Returns [`LspError::ServerStartFailed`] if the server cannot be spawned.
    fn launch(&self, descriptor: &LaunchDescriptor) -> LspResult<LaunchedServer>;
}

/// Launches the server as a child process speaking LSP over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, descriptor: &LaunchDescriptor) -> LspResult<LaunchedServer> {
        let mut cmd = async_process::Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .current_dir(&descriptor.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            LspError::ServerStartFailed(format!(
                "failed to spawn '{}': {}",
                descriptor.command.display(),
                e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::ServerStartFailed("failed to capture stdout".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::ServerStartFailed("failed to capture stdin".to_string()))?;

        // the server logs to stderr; keep it under the server's target
        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) => debug!(target: "trlc_server", pid, "{line}"),
                        Err(e) => {
                            debug!(pid, error = %e, "server stderr closed");
                            break;
                        }
                    }
                }
            });
        }

        debug!(pid = child.id(), command = %descriptor.command.display(), "spawned language server");

        Ok(LaunchedServer {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Box::new(ChildProcess { child }),
        })
    }
}

/// [`ServerProcess`] over an `async_process` child.
#[derive(Debug)]
struct ChildProcess {
    child: async_process::Child,
}

#[async_trait]
impl ServerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.status().await?;
        Ok(status.code())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }
}
