//! Forwards workspace file changes to the server.
//!
//! A `notify` watcher runs over the workspace root. Events for paths whose
//! workspace-relative form matches the configured glob are sent to the
//! server as `workspace/didChangeWatchedFiles` notifications from a
//! background task, so they never contend with requests.

use std::path::Path;

use async_lsp::ServerSocket;
use glob::Pattern;
use lsp_types::notification::DidChangeWatchedFiles;
use lsp_types::{DidChangeWatchedFilesParams, FileChangeType, FileEvent, Url};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LspError;

use super::LspResult;

/// Live file watch. Dropping it stops forwarding.
pub struct FileWatch {
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl std::fmt::Debug for FileWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatch").finish_non_exhaustive()
    }
}

impl FileWatch {
    /// Starts watching `root` recursively, forwarding matches of `pattern`.
    ///
    /// # Errors
    /// Returns [`LspError::WatchFailed`] if the watcher cannot be installed.
    pub fn start(root: &Path, pattern: Pattern, server: ServerSocket) -> LspResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!(error = %e, "file watch error"),
            }
        })
        .map_err(|e| LspError::WatchFailed(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| LspError::WatchFailed(format!("failed to watch '{}': {e}", root.display())))?;

        let root = root.to_path_buf();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let changes = file_events(&root, &pattern, &event);
                if changes.is_empty() {
                    continue;
                }
                debug!(count = changes.len(), "forwarding watched file changes");
                if let Err(e) =
                    server.notify::<DidChangeWatchedFiles>(DidChangeWatchedFilesParams { changes })
                {
                    debug!(error = ?e, "server gone, stopping file watch");
                    break;
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            forwarder,
        })
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Maps a change kind to its LSP counterpart. Access events are ignored.
fn change_type(kind: &EventKind) -> Option<FileChangeType> {
    match kind {
        EventKind::Create(_) => Some(FileChangeType::CREATED),
        EventKind::Modify(_) => Some(FileChangeType::CHANGED),
        EventKind::Remove(_) => Some(FileChangeType::DELETED),
        _ => None,
    }
}

/// Converts a watcher event into the file events the server should see.
pub(crate) fn file_events(root: &Path, pattern: &Pattern, event: &Event) -> Vec<FileEvent> {
    let Some(typ) = change_type(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter(|path| matches_relative(root, pattern, path))
        .filter_map(|path| Url::from_file_path(path).ok())
        .map(|uri| FileEvent { uri, typ })
        .collect()
}

fn matches_relative(root: &Path, pattern: &Pattern, path: &Path) -> bool {
    path.strip_prefix(root)
        .is_ok_and(|relative| pattern.matches_path(relative))
}
