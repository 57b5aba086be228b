//! In-process stand-in for the TRLC language server.
//!
//! Speaks LSP over a tokio duplex pipe and records what it received, so
//! tests can drive a real `LanguageClientSession` without Python.

use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_lsp::{ClientSocket, MainLoop};
use async_lsp::concurrency::ConcurrencyLayer;
use async_lsp::router::Router;
use async_trait::async_trait;
use lsp_types::notification::{
    DidChangeTextDocument, DidChangeWatchedFiles, DidCloseTextDocument, DidOpenTextDocument, Exit,
    Initialized, PublishDiagnostics,
};
use lsp_types::request::{
    HoverRequest, Initialize, RegisterCapability, Shutdown, WorkspaceConfiguration,
};
use lsp_types::{
    ConfigurationItem, ConfigurationParams, Diagnostic, DiagnosticSeverity, Hover, HoverContents,
    HoverProviderCapability, InitializeResult, MarkupContent, MarkupKind, Position,
    PublishDiagnosticsParams, Range, Registration, RegistrationParams, ServerCapabilities,
    ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind, Url,
};
use serde_json::Value;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tower::ServiceBuilder;
use trlc_client::launch::LaunchDescriptor;
use trlc_client::lsp::{LaunchedServer, Launcher, LspResult, ServerProcess};

/// Hover requests on this line take a minute to answer.
pub const SLOW_LINE: u32 = 99;

/// How the fake server reacts to `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Behavior {
    /// Answers everything promptly.
    #[default]
    Normal,
    /// Never answers `initialize`.
    NeverInitialize,
    /// Answers `shutdown` but keeps running after `exit`.
    IgnoreExit,
}

/// Diagnostic published for every opened document.
pub const OPEN_DIAGNOSTIC: &str = "record has no description";

/// What the fake server has seen, across all launches.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub initialize: AtomicUsize,
    pub hovers: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub watched_changes: AtomicUsize,
    pub opened: Mutex<Vec<Url>>,
    pub changed_versions: Mutex<Vec<i32>>,
    pub closed: Mutex<Vec<Url>>,
    /// Client answers to `workspace/configuration`.
    pub configuration_replies: Mutex<Vec<Vec<Value>>>,
    /// Acknowledged `client/registerCapability` requests.
    pub registrations_acked: AtomicUsize,
}

impl ServerStats {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct FakeState {
    behavior: Behavior,
    stats: Arc<ServerStats>,
    client: ClientSocket,
}

impl FakeState {
    /// Behaves like the TRLC server after a file is opened: asks for
    /// configuration, registers a watcher and publishes diagnostics.
    fn after_open(&self, uri: Url) {
        let client = self.client.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let items = vec![
                ConfigurationItem {
                    scope_uri: Some(uri.clone()),
                    section: Some("trlc".to_string()),
                },
                ConfigurationItem {
                    scope_uri: None,
                    section: Some("trlcTools".to_string()),
                },
            ];
            if let Ok(reply) = client
                .request::<WorkspaceConfiguration>(ConfigurationParams { items })
                .await
            {
                stats.configuration_replies.lock().unwrap().push(reply);
            }

            let registration = Registration {
                id: "watch-rsl".to_string(),
                method: "workspace/didChangeWatchedFiles".to_string(),
                register_options: None,
            };
            if client
                .request::<RegisterCapability>(RegistrationParams {
                    registrations: vec![registration],
                })
                .await
                .is_ok()
            {
                stats.registrations_acked.fetch_add(1, Ordering::SeqCst);
            }

            let _ = client.notify::<PublishDiagnostics>(PublishDiagnosticsParams {
                uri,
                diagnostics: vec![Diagnostic {
                    range: Range::new(Position::new(0, 0), Position::new(0, 7)),
                    severity: Some(DiagnosticSeverity::WARNING),
                    source: Some("trlc".to_string()),
                    message: OPEN_DIAGNOSTIC.to_string(),
                    ..Diagnostic::default()
                }],
                version: None,
            });
        });
    }
}

/// [`Launcher`] that runs the fake server as a tokio task.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    behavior: Behavior,
    pub stats: Arc<ServerStats>,
    pub launches: AtomicUsize,
    pub kills: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_behavior(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            ..Self::default()
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, _descriptor: &LaunchDescriptor) -> LspResult<LaunchedServer> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let task = tokio::spawn(run_fake_server(
            server_read,
            server_write,
            self.behavior,
            self.stats.clone(),
        ));

        let (client_read, client_write) = tokio::io::split(client_io);
        Ok(LaunchedServer {
            reader: Box::new(client_read.compat()),
            writer: Box::new(client_write.compat_write()),
            process: Box::new(FakeProcess {
                task,
                kills: self.kills.clone(),
            }),
        })
    }
}

/// The fake server task posing as a process.
struct FakeProcess {
    task: JoinHandle<()>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl ServerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        (&mut self.task).await.map_err(io::Error::other)?;
        Ok(Some(0))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.task.abort();
        Ok(())
    }
}

async fn run_fake_server(
    input: ReadHalf<DuplexStream>,
    output: WriteHalf<DuplexStream>,
    behavior: Behavior,
    stats: Arc<ServerStats>,
) {
    let (mainloop, _client) = MainLoop::new_server(|client| {
        let mut router = Router::new(FakeState {
            behavior,
            stats,
            client,
        });

        router
            .request::<Initialize, _>(|st, _params| {
                st.stats.initialize.fetch_add(1, Ordering::SeqCst);
                let behavior = st.behavior;
                async move {
                    if behavior == Behavior::NeverInitialize {
                        futures::future::pending::<()>().await;
                    }
                    Ok(InitializeResult {
                        capabilities: ServerCapabilities {
                            hover_provider: Some(HoverProviderCapability::Simple(true)),
                            text_document_sync: Some(TextDocumentSyncCapability::Kind(
                                TextDocumentSyncKind::FULL,
                            )),
                            ..ServerCapabilities::default()
                        },
                        server_info: Some(ServerInfo {
                            name: "fake-trlc".to_string(),
                            version: None,
                        }),
                    })
                }
            })
            .request::<HoverRequest, _>(|st, params| {
                st.stats.hovers.fetch_add(1, Ordering::SeqCst);
                let position = params.text_document_position_params.position;
                async move {
                    if position.line == SLOW_LINE {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok(Some(Hover {
                        contents: HoverContents::Markup(MarkupContent {
                            kind: MarkupKind::Markdown,
                            value: format!("hover at {}:{}", position.line, position.character),
                        }),
                        range: None,
                    }))
                }
            })
            .request::<Shutdown, _>(|st, ()| {
                st.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .notification::<Initialized>(|_, _| ControlFlow::Continue(()))
            .notification::<Exit>(|st, ()| {
                if st.behavior == Behavior::IgnoreExit {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(Ok(()))
                }
            })
            .notification::<DidOpenTextDocument>(|st, params| {
                let uri = params.text_document.uri;
                st.stats.opened.lock().unwrap().push(uri.clone());
                st.after_open(uri);
                ControlFlow::Continue(())
            })
            .notification::<DidChangeTextDocument>(|st, params| {
                st.stats
                    .changed_versions
                    .lock()
                    .unwrap()
                    .push(params.text_document.version);
                ControlFlow::Continue(())
            })
            .notification::<DidCloseTextDocument>(|st, params| {
                st.stats.closed.lock().unwrap().push(params.text_document.uri);
                ControlFlow::Continue(())
            })
            .notification::<DidChangeWatchedFiles>(|st, params| {
                st.stats
                    .watched_changes
                    .fetch_add(params.changes.len(), Ordering::SeqCst);
                ControlFlow::Continue(())
            })
            .unhandled_notification(|_, _| ControlFlow::Continue(()));

        ServiceBuilder::new()
            .layer(ConcurrencyLayer::default())
            .service(router)
    });

    let _ = mainloop
        .run_buffered(input.compat(), output.compat_write())
        .await;
}
