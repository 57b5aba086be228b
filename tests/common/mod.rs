//! Common test helpers and utilities.

#![allow(dead_code)]

pub mod fake_server;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use trlc_client::config::Settings;
use trlc_client::error::ProvisionError;
use trlc_client::extension::TrlcExtension;
use trlc_client::host::ExtensionContext;
use trlc_client::launch::{ExecutionMode, LaunchDescriptor};
use trlc_client::lsp::LanguageClientSession;
use trlc_client::provision::{PackageInstaller, PackageSpec};
use trlc_client::state::{JsonStateStore, StateStore};

// Re-export for convenience
pub use fake_server::{Behavior, FakeLauncher, OPEN_DIAGNOSTIC, SLOW_LINE, ServerStats};

/// Descriptor handed to fake launchers; nothing is spawned from it.
pub fn descriptor() -> LaunchDescriptor {
    LaunchDescriptor {
        command: PathBuf::from("python3"),
        args: vec!["-O".to_string(), "-m".to_string(), "server".to_string()],
        working_directory: std::env::temp_dir(),
    }
}

/// Session over `launcher` with short timeouts and no file watch.
pub fn session(launcher: Arc<FakeLauncher>) -> LanguageClientSession {
    LanguageClientSession::builder()
        .launcher(launcher)
        .without_file_watch()
        .init_timeout(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(30))
        .shutdown_grace(Duration::from_secs(2))
        .build()
        .expect("valid session configuration")
}

/// Temporary workspace with TRLC documents in it.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Canonical root, so paths match what file watchers report.
    pub fn root(&self) -> PathBuf {
        self.dir
            .path()
            .canonicalize()
            .expect("failed to canonicalize temp dir")
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, content).expect("failed to write file");
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Installer that succeeds or fails on demand and counts its runs.
#[derive(Debug, Default)]
pub struct CountingInstaller {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl CountingInstaller {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageInstaller for CountingInstaller {
    async fn install(&self, _target: &Path, package: &PackageSpec) -> Result<String, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProvisionError::InstallFailed {
                package: package.to_string(),
                code: Some(1),
                stderr: "ERROR: No matching distribution found".to_string(),
            });
        }
        Ok(format!("Successfully installed {package}"))
    }
}

/// A primary extension wired to fakes.
pub struct ExtensionFixture {
    pub workspace: TestWorkspace,
    pub state: Arc<dyn StateStore>,
    pub launcher: Arc<FakeLauncher>,
    pub installer: Arc<CountingInstaller>,
}

impl ExtensionFixture {
    pub fn new(installer: Arc<CountingInstaller>) -> Self {
        let workspace = TestWorkspace::new();
        let state: Arc<dyn StateStore> =
            Arc::new(JsonStateStore::new(workspace.root().join(".trlc/state.json")));
        Self {
            workspace,
            state,
            launcher: FakeLauncher::new(),
            installer,
        }
    }

    pub fn settings(interpreter: Option<&str>) -> Settings {
        Settings {
            interpreter_path: interpreter.map(str::to_string),
            init_timeout_secs: 5,
            shutdown_grace_secs: 2,
            ..Settings::default()
        }
    }

    pub fn context(&self) -> ExtensionContext {
        ExtensionContext {
            extension_path: self.workspace.root().join("extension"),
            mode: ExecutionMode::Development,
            workspace_root: None,
            workspace_state: self.state.clone(),
        }
    }

    /// A fresh extension instance sharing this fixture's state and fakes.
    pub fn extension(&self, settings: Settings) -> TrlcExtension {
        TrlcExtension::builder(self.context(), settings)
            .installer(self.installer.clone())
            .launcher(self.launcher.clone())
            .build()
            .expect("valid extension configuration")
    }
}
