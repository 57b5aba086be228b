//! Language client session for the TRLC server.
//!
//! A [`LanguageClientSession`] owns exactly one server process and the
//! protocol channel to it. Its lifecycle is a one-way state machine:
//!
//! ```text
//! NotStarted --start--> Starting --handshake ok--> Running --stop--> Stopped
//!                           \------handshake failed-----------------^
//! ```
//!
//! `Stopped` is terminal; restarting means building a new session.
//!
//! # Example
//!
//! ```ignore
//! use trlc_client::lsp::client::LanguageClientSession;
//!
//! let session = LanguageClientSession::builder()
//!     .workspace_root("/path/to/requirements")
//!     .build()?;
//! session.start(&descriptor).await?;
//! let hover = session.request::<HoverRequest>(params).await?;
//! session.stop().await;
//! ```

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_lsp::concurrency::ConcurrencyLayer;
use async_lsp::panic::CatchUnwindLayer;
use async_lsp::router::Router;
use async_lsp::tracing::TracingLayer;
use async_lsp::{MainLoop, ServerSocket};
use glob::Pattern;
use lsp_types::notification::{self, Notification};
use lsp_types::request::{self, Request};
use lsp_types::{
    ClientCapabilities, ClientInfo, Diagnostic, DidChangeTextDocumentParams,
    DidChangeWatchedFilesClientCapabilities, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, HoverClientCapabilities, InitializeParams, InitializedParams,
    MarkupKind, MessageType, PublishDiagnosticsClientCapabilities, ServerCapabilities,
    TextDocumentClientCapabilities, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentSyncClientCapabilities, TraceValue, Url,
    VersionedTextDocumentIdentifier, WindowClientCapabilities, WorkDoneProgressParams,
    WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, LspError};
use crate::launch::LaunchDescriptor;

use super::LspResult;
use super::process::{LaunchedServer, Launcher, ProcessLauncher, ServerProcess};
use super::types::{DEFAULT_WATCH_PATTERN, DocumentSelector, compile_glob, language_id_for, path_to_url};
use super::watch::FileWatch;

type DiagnosticsMap = Arc<RwLock<HashMap<Url, Vec<Diagnostic>>>>;

/// Router state for messages the server sends to us.
#[derive(Debug, Clone)]
struct ClientState {
    diagnostics: DiagnosticsMap,
}

impl ClientState {
    fn record_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        if let Ok(mut map) = self.diagnostics.write() {
            if diagnostics.is_empty() {
                map.remove(&uri);
            } else {
                map.insert(uri, diagnostics);
            }
        }
    }
}

/// Configuration for a language client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Workspace folder announced to the server and watched for changes.
    pub workspace_root: Option<PathBuf>,
    /// Documents the server handles.
    pub document_selector: DocumentSelector,
    /// Workspace files whose changes are forwarded to the server.
    pub watch_pattern: Option<Pattern>,
    /// Bound on the initialize handshake.
    pub init_timeout: Duration,
    /// Bound on each request.
    pub request_timeout: Duration,
    /// How long `stop` waits for the server to exit before killing it.
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            document_selector: DocumentSelector::default(),
            watch_pattern: Pattern::new(DEFAULT_WATCH_PATTERN).ok(),
            init_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Builder for a [`LanguageClientSession`].
pub struct SessionBuilder {
    config: SessionConfig,
    watch_pattern: Option<String>,
    document_patterns: Option<Vec<String>>,
    launcher: Arc<dyn Launcher>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            watch_pattern: None,
            document_patterns: None,
            launcher: Arc::new(ProcessLauncher),
        }
    }
}

impl SessionBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(path.into());
        self
    }

    /// Sets the glob of watched workspace files.
    #[must_use]
    pub fn watch_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.watch_pattern = Some(pattern.into());
        self
    }

    /// Disables the file watch.
    #[must_use]
    pub fn without_file_watch(mut self) -> Self {
        self.watch_pattern = None;
        self.config.watch_pattern = None;
        self
    }

    /// Sets the document selector globs.
    #[must_use]
    pub fn document_patterns(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.document_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the initialization timeout.
    #[must_use]
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Replaces the process launcher.
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Builds an idle session. Nothing is spawned until [`LanguageClientSession::start`].
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidPattern`] if a glob does not compile.
    pub fn build(mut self) -> Result<LanguageClientSession, ConfigError> {
        if let Some(pattern) = &self.watch_pattern {
            self.config.watch_pattern = Some(compile_glob("trlc.fileWatchPattern", pattern)?);
        }
        if let Some(patterns) = &self.document_patterns {
            self.config.document_selector = DocumentSelector::new(patterns)?;
        }

        Ok(LanguageClientSession {
            config: self.config,
            launcher: self.launcher,
            state: Mutex::new(SessionState::NotStarted),
            start_gate: Mutex::new(()),
            stop_requested: watch::channel(false).0,
            documents: Mutex::new(HashMap::new()),
            diagnostics: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, never started.
    NotStarted,
    /// Spawning the server or negotiating capabilities.
    Starting,
    /// Handshake complete; requests are accepted.
    Running,
    /// Terminal.
    Stopped,
}

enum SessionState {
    NotStarted,
    Starting,
    Running(RunningSession),
    Stopped,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            Self::NotStarted => SessionStatus::NotStarted,
            Self::Starting => SessionStatus::Starting,
            Self::Running(_) => SessionStatus::Running,
            Self::Stopped => SessionStatus::Stopped,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running(_) => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Everything that only exists while the server is up.
struct RunningSession {
    server: ServerSocket,
    capabilities: Arc<ServerCapabilities>,
    mainloop: JoinHandle<()>,
    process: Box<dyn ServerProcess>,
    watch: Option<FileWatch>,
}

impl RunningSession {
    /// Graceful shutdown bounded by `grace`, then a kill if needed.
    async fn shutdown(mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        drop(self.watch.take());

        match tokio::time::timeout_at(deadline, self.server.request::<request::Shutdown>(())).await {
            Ok(Ok(())) => debug!("language server acknowledged shutdown"),
            Ok(Err(e)) => warn!(error = %e, "shutdown request failed"),
            Err(_) => warn!(?grace, "shutdown request timed out"),
        }

        if let Err(e) = self.server.notify::<notification::Exit>(()) {
            debug!(error = %e, "exit notification not delivered");
        }

        match tokio::time::timeout_at(deadline, self.process.wait()).await {
            Ok(Ok(code)) => info!(?code, "language server exited"),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to collect language server exit status");
                kill(self.process.as_mut());
            }
            Err(_) => {
                warn!(?grace, "language server did not exit in time, killing it");
                kill(self.process.as_mut());
            }
        }

        // rejects whatever is still in flight
        self.mainloop.abort();
    }
}

fn kill(process: &mut dyn ServerProcess) {
    if let Err(e) = process.kill() {
        warn!(pid = process.id(), error = %e, "failed to kill language server");
    }
}

/// The single live connection to the TRLC language server.
pub struct LanguageClientSession {
    config: SessionConfig,
    launcher: Arc<dyn Launcher>,
    state: Mutex<SessionState>,
    /// Held by `start` and `stop` for their whole duration.
    start_gate: Mutex<()>,
    /// Set by `stop`; aborts a handshake that is still in progress.
    stop_requested: watch::Sender<bool>,
    /// Open documents and their last sent version.
    documents: Mutex<HashMap<Url, i32>>,
    diagnostics: DiagnosticsMap,
}

impl std::fmt::Debug for LanguageClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageClientSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LanguageClientSession {
    /// Creates a new builder for constructing a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status()
    }

    /// Server capabilities, once running.
    pub async fn capabilities(&self) -> Option<Arc<ServerCapabilities>> {
        match &*self.state.lock().await {
            SessionState::Running(running) => Some(running.capabilities.clone()),
            _ => None,
        }
    }

    /// Spawns the server and completes the LSP handshake.
    ///
    /// Concurrent calls are coalesced: the second caller waits for the first
    /// and gets the same capabilities without spawning another process.
    ///
    /// # Errors
    /// [`LspError::SessionStopped`] if the session already stopped or `stop`
    /// was called during the handshake; a spawn or handshake error otherwise,
    /// after which the session is `Stopped`.
    pub async fn start(&self, descriptor: &LaunchDescriptor) -> LspResult<Arc<ServerCapabilities>> {
        let _gate = self.start_gate.lock().await;

        {
            let mut state = self.state.lock().await;
            match &*state {
                SessionState::Running(running) => return Ok(running.capabilities.clone()),
                SessionState::Stopped => return Err(LspError::SessionStopped),
                SessionState::NotStarted | SessionState::Starting => {
                    *state = SessionState::Starting;
                }
            }
        }

        info!(
            command = %descriptor.command.display(),
            args = ?descriptor.args,
            cwd = %descriptor.working_directory.display(),
            "starting TRLC language server"
        );

        match self.launch_and_initialize(descriptor).await {
            Ok(running) => {
                let capabilities = running.capabilities.clone();
                *self.state.lock().await = SessionState::Running(running);
                info!("TRLC language server is running");
                Ok(capabilities)
            }
            Err(LspError::SessionStopped) => {
                info!("start cancelled by stop");
                *self.state.lock().await = SessionState::Stopped;
                Err(LspError::SessionStopped)
            }
            Err(e) => {
                error!(error = %e, "TRLC language server failed to start");
                *self.state.lock().await = SessionState::Stopped;
                Err(e)
            }
        }
    }

    async fn launch_and_initialize(&self, descriptor: &LaunchDescriptor) -> LspResult<RunningSession> {
        let LaunchedServer {
            reader,
            writer,
            mut process,
        } = self.launcher.launch(descriptor)?;

        let diagnostics = self.diagnostics.clone();
        let (mainloop, server) = MainLoop::new_client(|_server| {
            let mut router = Router::new(ClientState { diagnostics });

            router
                .request::<request::RegisterCapability, _>(|_, params| {
                    for registration in &params.registrations {
                        debug!(method = %registration.method, "server registered capability");
                    }
                    async { Ok(()) }
                })
                .request::<request::UnregisterCapability, _>(|_, _| async { Ok(()) })
                .request::<request::WorkspaceConfiguration, _>(|_, params| {
                    // no client-side settings are exposed to the server
                    let items = params.items.len();
                    async move { Ok(vec![Value::Null; items]) }
                })
                .request::<request::WorkDoneProgressCreate, _>(|_, _| async { Ok(()) })
                .request::<request::ShowMessageRequest, _>(|_, params| {
                    log_server_message(params.typ, &params.message);
                    async { Ok(None) }
                })
                .notification::<notification::LogMessage>(|_, params| {
                    log_server_message(params.typ, &params.message);
                    ControlFlow::Continue(())
                })
                .notification::<notification::ShowMessage>(|_, params| {
                    log_server_message(params.typ, &params.message);
                    ControlFlow::Continue(())
                })
                .notification::<notification::PublishDiagnostics>(|this, params| {
                    this.record_diagnostics(params.uri, params.diagnostics);
                    ControlFlow::Continue(())
                })
                .notification::<notification::Progress>(|_, _| ControlFlow::Continue(()))
                .unhandled_notification(|_, notif| {
                    debug!(method = %notif.method, "ignoring server notification");
                    ControlFlow::Continue(())
                });

            ServiceBuilder::new()
                .layer(TracingLayer::default())
                .layer(CatchUnwindLayer::default())
                .layer(ConcurrencyLayer::default())
                .service(router)
        });

        let mainloop = tokio::spawn(async move {
            if let Err(e) = mainloop.run_buffered(reader, writer).await {
                debug!(error = %e, "language client main loop ended");
            }
        });

        let mut stop_requested = self.stop_requested.subscribe();
        let handshake = tokio::select! {
            result = tokio::time::timeout(self.config.init_timeout, self.handshake(&server)) => {
                result.unwrap_or(Err(LspError::Timeout(self.config.init_timeout)))
            }
            () = async {
                let _ = stop_requested.wait_for(|stop| *stop).await;
            } => Err(LspError::SessionStopped),
        };
        let capabilities = match handshake {
            Ok(capabilities) => capabilities,
            Err(e) => {
                kill(process.as_mut());
                mainloop.abort();
                return Err(e);
            }
        };

        let watch = match (&self.config.workspace_root, &self.config.watch_pattern) {
            (Some(root), Some(pattern)) => {
                match FileWatch::start(root, pattern.clone(), server.clone()) {
                    Ok(watch) => Some(watch),
                    Err(e) => {
                        warn!(error = %e, "continuing without file watch");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(RunningSession {
            server,
            capabilities: Arc::new(capabilities),
            mainloop,
            process,
            watch,
        })
    }

    async fn handshake(&self, server: &ServerSocket) -> LspResult<ServerCapabilities> {
        let result = server
            .request::<request::Initialize>(self.initialize_params())
            .await
            .map_err(|e| LspError::InitializationFailed(format!("initialize request failed: {e}")))?;

        server
            .notify::<notification::Initialized>(InitializedParams {})
            .map_err(|e| {
                LspError::InitializationFailed(format!("initialized notification failed: {e}"))
            })?;

        Ok(result.capabilities)
    }

    fn initialize_params(&self) -> InitializeParams {
        let workspace_folders = self.config.workspace_root.as_ref().and_then(|root| {
            let uri = Url::from_file_path(root).ok()?;
            let name = root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("workspace")
                .to_string();
            Some(vec![WorkspaceFolder { uri, name }])
        });

        InitializeParams {
            process_id: Some(std::process::id()),
            workspace_folders,
            initialization_options: None,
            capabilities: ClientCapabilities {
                workspace: Some(WorkspaceClientCapabilities {
                    configuration: Some(true),
                    workspace_folders: Some(true),
                    did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                        dynamic_registration: Some(false),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                text_document: Some(TextDocumentClientCapabilities {
                    synchronization: Some(TextDocumentSyncClientCapabilities {
                        dynamic_registration: Some(false),
                        will_save: Some(false),
                        will_save_wait_until: Some(false),
                        did_save: Some(false),
                    }),
                    hover: Some(HoverClientCapabilities {
                        dynamic_registration: Some(false),
                        content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                    }),
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
                    ..Default::default()
                }),
                window: Some(WindowClientCapabilities {
                    work_done_progress: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            trace: Some(TraceValue::Off),
            client_info: Some(ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            locale: None,
            work_done_progress_params: WorkDoneProgressParams::default(),
            ..Default::default()
        }
    }

    async fn running_socket(&self) -> LspResult<ServerSocket> {
        match &*self.state.lock().await {
            SessionState::Running(running) => Ok(running.server.clone()),
            other => Err(LspError::NotRunning {
                state: other.name(),
            }),
        }
    }

    /// Sends a request and waits for the server's reply.
    ///
    /// Fails immediately with [`LspError::NotRunning`] outside `Running`.
    /// Custom server methods are sent by implementing
    /// [`lsp_types::request::Request`] for a marker type.
    ///
    /// # Errors
    /// `NotRunning`, a timeout, or the server's error response.
    pub async fn request<R: Request>(&self, params: R::Params) -> LspResult<R::Result> {
        let server = self.running_socket().await?;

        tokio::time::timeout(self.config.request_timeout, server.request::<R>(params))
            .await
            .map_err(|_| LspError::Timeout(self.config.request_timeout))?
            .map_err(|e| LspError::RequestFailed(format!("{} failed: {e}", R::METHOD)))
    }

    /// Sends a notification without waiting for anything.
    ///
    /// # Errors
    /// `NotRunning` outside `Running`, or if the channel is closed.
    pub async fn notify<N: Notification>(&self, params: N::Params) -> LspResult<()> {
        self.running_socket()
            .await?
            .notify::<N>(params)
            .map_err(|e| LspError::RequestFailed(format!("{} notification failed: {e}", N::METHOD)))
    }

    /// Opens a TRLC document in the server.
    ///
    /// Opening a document that is already open resends its current text as
    /// a change with the next version.
    ///
    /// # Errors
    /// [`LspError::DocumentNotFound`] if the file is not selected by the
    /// document patterns or cannot be read; `NotRunning` outside `Running`.
    pub async fn open_document(&self, path: &Path) -> LspResult<Url> {
        if !self.config.document_selector.matches(path) {
            return Err(LspError::DocumentNotFound(format!(
                "'{}' is not a TRLC document",
                path.display()
            )));
        }

        let uri = path_to_url(path)?;
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            LspError::DocumentNotFound(format!("failed to read '{}': {}", path.display(), e))
        })?;

        let mut documents = self.documents.lock().await;
        if let Some(version) = documents.get_mut(&uri) {
            debug!(uri = %uri, "document already open, sending its text as a change");
            let next = *version + 1;
            self.send_full_change(uri.clone(), next, text).await?;
            *version = next;
            return Ok(uri);
        }

        self.notify::<notification::DidOpenTextDocument>(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: language_id_for(path).to_string(),
                version: 0,
                text,
            },
        })
        .await?;

        documents.insert(uri.clone(), 0);
        Ok(uri)
    }

    /// Replaces the full text of an open document.
    ///
    /// # Errors
    /// [`LspError::DocumentNotFound`] if the document is not open.
    pub async fn change_document(&self, path: &Path, text: &str) -> LspResult<()> {
        let uri = path_to_url(path)?;

        let mut documents = self.documents.lock().await;
        let version = documents.get_mut(&uri).ok_or_else(|| {
            LspError::DocumentNotFound(format!("document not open: {}", path.display()))
        })?;
        let next = *version + 1;
        self.send_full_change(uri, next, text.to_string()).await?;
        *version = next;
        Ok(())
    }

    async fn send_full_change(&self, uri: Url, version: i32, text: String) -> LspResult<()> {
        self.notify::<notification::DidChangeTextDocument>(DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier { uri, version },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text,
            }],
        })
        .await
    }

    /// Closes a document in the server. Documents that are not open are
    /// left alone.
    ///
    /// # Errors
    /// `NotRunning` outside `Running`.
    pub async fn close_document(&self, path: &Path) -> LspResult<()> {
        let uri = path_to_url(path)?;

        let mut documents = self.documents.lock().await;
        if !documents.contains_key(&uri) {
            debug!(uri = %uri, "close of a document that is not open");
            return Ok(());
        }

        self.notify::<notification::DidCloseTextDocument>(DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
        })
        .await?;
        documents.remove(&uri);
        Ok(())
    }

    /// Latest diagnostics the server published for `uri`.
    pub fn diagnostics(&self, uri: &Url) -> Vec<Diagnostic> {
        self.diagnostics
            .read()
            .map(|map| map.get(uri).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Shuts the server down. Safe to call any number of times.
    ///
    /// In-flight requests are rejected rather than left pending. Only the
    /// first call that finds the session running sends anything. A start
    /// still waiting on its handshake is cancelled, so `stop` is bounded by
    /// `shutdown_grace` rather than `init_timeout`.
    pub async fn stop(&self) {
        self.stop_requested.send_replace(true);
        let _gate = self.start_gate.lock().await;

        let previous = std::mem::replace(&mut *self.state.lock().await, SessionState::Stopped);
        let running = match previous {
            SessionState::Running(running) => running,
            idle => {
                debug!(state = idle.name(), "stop on idle session");
                return;
            }
        };

        info!("stopping TRLC language server");
        self.documents.lock().await.clear();
        running.shutdown(self.config.shutdown_grace).await;
    }
}

fn log_server_message(typ: MessageType, message: &str) {
    if typ == MessageType::ERROR {
        error!(target: "trlc_server", "{message}");
    } else if typ == MessageType::WARNING {
        warn!(target: "trlc_server", "{message}");
    } else if typ == MessageType::INFO {
        info!(target: "trlc_server", "{message}");
    } else {
        debug!(target: "trlc_server", "{message}");
    }
}
