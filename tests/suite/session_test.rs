use std::sync::Arc;
use std::time::{Duration, Instant};

use lsp_types::request::HoverRequest;
use lsp_types::{
    HoverParams, Position, TextDocumentIdentifier, TextDocumentPositionParams, Url,
    WorkDoneProgressParams,
};
use serde_json::Value;
use serial_test::serial;
use tokio_test::{assert_err, assert_ok};
use trlc_client::api::{SessionFacade, TrlcApi};
use trlc_client::error::LspError;
use trlc_client::lsp::{LanguageClientSession, SessionStatus};

use crate::common::{
    Behavior, FakeLauncher, OPEN_DIAGNOSTIC, SLOW_LINE, ServerStats, TestWorkspace, descriptor,
    session,
};

fn hover_params(uri: &Url, line: u32, character: u32) -> HoverParams {
    HoverParams {
        text_document_position_params: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            position: Position::new(line, character),
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
    }
}

fn doc_uri() -> Url {
    Url::parse("file:///ws/reqs/brakes.trlc").unwrap()
}

#[tokio::test]
async fn test_start_reaches_running_and_hover_answers() {
    let launcher = FakeLauncher::new();
    let session = session(launcher.clone());

    let capabilities = session.start(&descriptor()).await.unwrap();
    assert!(capabilities.hover_provider.is_some());
    assert_eq!(session.status().await, SessionStatus::Running);

    let hover = session
        .request::<HoverRequest>(hover_params(&doc_uri(), 2, 4))
        .await
        .unwrap()
        .expect("server answers hovers");
    match hover.contents {
        lsp_types::HoverContents::Markup(markup) => assert_eq!(markup.value, "hover at 2:4"),
        other => panic!("unexpected hover contents: {other:?}"),
    }

    session.stop().await;
    assert_eq!(session.status().await, SessionStatus::Stopped);
}

#[tokio::test]
async fn test_concurrent_start_spawns_one_process() {
    let launcher = FakeLauncher::new();
    let session = session(launcher.clone());
    let d = descriptor();

    let (first, second) = tokio::join!(session.start(&d), session.start(&d));
    let first = assert_ok!(first);
    let second = assert_ok!(second);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(launcher.launches(), 1);
    assert_eq!(ServerStats::count(&launcher.stats.initialize), 1);

    session.stop().await;
}

#[tokio::test]
async fn test_request_before_start_fails_fast() {
    let launcher = FakeLauncher::new();
    let session = Arc::new(session(launcher.clone()));

    let result = tokio::time::timeout(
        Duration::from_millis(500),
        session.request::<HoverRequest>(hover_params(&doc_uri(), 0, 0)),
    )
    .await
    .expect("request outside Running must not hang");
    assert!(matches!(
        result,
        Err(LspError::NotRunning {
            state: "not started"
        })
    ));

    let facade = SessionFacade::new(session);
    assert!(facade.hover_details(doc_uri(), Position::new(0, 0)).await.is_none());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_repeated_stop_sends_nothing_more() {
    let launcher = FakeLauncher::new();
    let session = session(launcher.clone());
    session.start(&descriptor()).await.unwrap();

    session.stop().await;
    assert_eq!(ServerStats::count(&launcher.stats.shutdowns), 1);
    // the fake exits on `exit`, so no kill is needed
    assert_eq!(launcher.kills(), 0);

    session.stop().await;
    session.stop().await;
    assert_eq!(ServerStats::count(&launcher.stats.shutdowns), 1);
    assert_eq!(launcher.kills(), 0);

    let result = session
        .request::<HoverRequest>(hover_params(&doc_uri(), 0, 0))
        .await;
    assert!(matches!(
        result,
        Err(LspError::NotRunning { state: "stopped" })
    ));
    assert!(matches!(
        session.start(&descriptor()).await,
        Err(LspError::SessionStopped)
    ));
}

#[tokio::test]
async fn test_handshake_timeout_stops_session_and_kills_server() {
    let launcher = FakeLauncher::with_behavior(Behavior::NeverInitialize);
    let session = LanguageClientSession::builder()
        .launcher(launcher.clone())
        .without_file_watch()
        .init_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = assert_err!(session.start(&descriptor()).await);
    assert!(matches!(err, LspError::Timeout(_)));
    assert!(err.is_handshake_failure());

    assert_eq!(session.status().await, SessionStatus::Stopped);
    assert_eq!(launcher.kills(), 1);

    // stopping a session that never ran signals nothing
    session.stop().await;
    assert_eq!(launcher.kills(), 1);
    assert_eq!(ServerStats::count(&launcher.stats.shutdowns), 0);
}

#[tokio::test]
async fn test_stop_kills_server_that_ignores_exit() {
    let launcher = FakeLauncher::with_behavior(Behavior::IgnoreExit);
    let session = LanguageClientSession::builder()
        .launcher(launcher.clone())
        .without_file_watch()
        .shutdown_grace(Duration::from_millis(300))
        .build()
        .unwrap();
    session.start(&descriptor()).await.unwrap();

    let started = Instant::now();
    session.stop().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(250), "stop returned before the grace period");
    assert!(elapsed < Duration::from_secs(3), "stop took {elapsed:?}");
    assert_eq!(ServerStats::count(&launcher.stats.shutdowns), 1);
    assert_eq!(launcher.kills(), 1);

    session.stop().await;
    assert_eq!(launcher.kills(), 1);
    assert_eq!(session.status().await, SessionStatus::Stopped);
}

#[tokio::test]
async fn test_stop_cancels_pending_handshake() {
    let launcher = FakeLauncher::with_behavior(Behavior::NeverInitialize);
    let session = Arc::new(
        LanguageClientSession::builder()
            .launcher(launcher.clone())
            .without_file_watch()
            .init_timeout(Duration::from_secs(60))
            .build()
            .unwrap(),
    );

    let starting = {
        let session = session.clone();
        tokio::spawn(async move { session.start(&descriptor()).await })
    };
    while ServerStats::count(&launcher.stats.initialize) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.status().await, SessionStatus::Starting);

    tokio::time::timeout(Duration::from_secs(5), session.stop())
        .await
        .expect("stop must not wait for the handshake timeout");

    let result = starting.await.unwrap();
    assert!(matches!(result, Err(LspError::SessionStopped)));
    assert_eq!(session.status().await, SessionStatus::Stopped);
    assert_eq!(launcher.kills(), 1);
}

#[tokio::test]
async fn test_stop_rejects_in_flight_request() {
    let launcher = FakeLauncher::new();
    let session = Arc::new(session(launcher.clone()));
    session.start(&descriptor()).await.unwrap();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .request::<HoverRequest>(hover_params(&doc_uri(), SLOW_LINE, 0))
                .await
        })
    };

    // let the request reach the server
    while ServerStats::count(&launcher.stats.hovers) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = Instant::now();
    session.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("in-flight request must be rejected, not left pending")
        .unwrap();

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_document_sync_tracks_versions() {
    let workspace = TestWorkspace::new();
    let doc = workspace.write("reqs/brakes.trlc", "package Brakes\n");
    let notes = workspace.write("notes.txt", "not a requirement\n");

    let launcher = FakeLauncher::new();
    let session = session(launcher.clone());
    session.start(&descriptor()).await.unwrap();

    let uri = session.open_document(&doc).await.unwrap();
    session.change_document(&doc, "package Brakes\n\n").await.unwrap();
    session.change_document(&doc, "package Brakes\n\n\n").await.unwrap();
    session.close_document(&doc).await.unwrap();

    assert!(matches!(
        session.open_document(&notes).await,
        Err(LspError::DocumentNotFound(_))
    ));
    assert!(matches!(
        session.change_document(&doc, "closed").await,
        Err(LspError::DocumentNotFound(_))
    ));

    // notifications are ordered, so a hover round-trip flushes them
    session
        .request::<HoverRequest>(hover_params(&uri, 0, 0))
        .await
        .unwrap();

    assert_eq!(*launcher.stats.opened.lock().unwrap(), vec![uri.clone()]);
    assert_eq!(*launcher.stats.changed_versions.lock().unwrap(), vec![1, 2]);
    assert_eq!(*launcher.stats.closed.lock().unwrap(), vec![uri]);

    session.stop().await;
}

#[tokio::test]
async fn test_reopen_and_stray_close_follow_document_lifecycle() {
    let workspace = TestWorkspace::new();
    let doc = workspace.write("reqs/brakes.trlc", "package Brakes\n");
    let never_opened = workspace.write("reqs/wipers.trlc", "package Wipers\n");

    let launcher = FakeLauncher::new();
    let session = session(launcher.clone());
    session.start(&descriptor()).await.unwrap();

    let uri = session.open_document(&doc).await.unwrap();
    workspace.write("reqs/brakes.trlc", "package Brakes\n\n");
    assert_eq!(session.open_document(&doc).await.unwrap(), uri);

    session.close_document(&never_opened).await.unwrap();
    session.close_document(&doc).await.unwrap();
    session.close_document(&doc).await.unwrap();

    session
        .request::<HoverRequest>(hover_params(&uri, 0, 0))
        .await
        .unwrap();

    assert_eq!(*launcher.stats.opened.lock().unwrap(), vec![uri.clone()]);
    assert_eq!(*launcher.stats.changed_versions.lock().unwrap(), vec![1]);
    assert_eq!(*launcher.stats.closed.lock().unwrap(), vec![uri]);

    session.stop().await;
}

#[tokio::test]
async fn test_server_requests_answered_and_diagnostics_cached() {
    let workspace = TestWorkspace::new();
    let doc = workspace.write("reqs/brakes.trlc", "package Brakes\n");

    let launcher = FakeLauncher::new();
    let session = session(launcher.clone());
    session.start(&descriptor()).await.unwrap();
    let uri = session.open_document(&doc).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.diagnostics(&uri).is_empty() {
        assert!(Instant::now() < deadline, "no diagnostics cached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // the server asks for configuration and registers before publishing
    assert_eq!(
        *launcher.stats.configuration_replies.lock().unwrap(),
        vec![vec![Value::Null, Value::Null]]
    );
    assert_eq!(ServerStats::count(&launcher.stats.registrations_acked), 1);

    let diagnostics = session.diagnostics(&uri);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, OPEN_DIAGNOSTIC);
    assert!(session.diagnostics(&doc_uri()).is_empty());

    session.stop().await;
}

#[tokio::test]
#[serial]
async fn test_watched_file_changes_reach_server() {
    let workspace = TestWorkspace::new();
    let launcher = FakeLauncher::new();
    let session = LanguageClientSession::builder()
        .launcher(launcher.clone())
        .workspace_root(workspace.root())
        .watch_pattern("**/.clientrc")
        .build()
        .unwrap();
    session.start(&descriptor()).await.unwrap();

    workspace.write("ignored.txt", "x");
    workspace.write(".clientrc", "[trlc]\n");

    let deadline = Instant::now() + Duration::from_secs(10);
    while ServerStats::count(&launcher.stats.watched_changes) == 0 {
        assert!(Instant::now() < deadline, "no watched file change forwarded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    session.stop().await;
}
