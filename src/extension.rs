//! The TRLC extension: activation, commands, deactivation.
//!
//! Activation provisions the server dependencies, derives the launch
//! descriptor and starts the language client session, strictly in that
//! order. Only a startup failure is user-visible, and even then a facade is
//! exported so dependent extensions see empty results instead of errors.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::api::{PRIMARY_EXTENSION_ID, SessionFacade, TrlcApi};
use crate::config::Settings;
use crate::error::{BridgeError, ConfigError, ProvisionError, StartupError};
use crate::host::{Extension, ExtensionContext};
use crate::launch::build_launch_descriptor;
use crate::lsp::{LanguageClientSession, Launcher, ProcessLauncher};
use crate::provision::{
    DEPENDENCY_DIR, PackageInstaller, PackageSpec, PipInstaller, ProvisionOutcome,
    ensure_provisioned, reset_provisioning,
};

/// Command that clears the provisioning flag.
pub const RESET_STATE_COMMAND: &str = "extension.resetState";

/// What happened during activation.
#[derive(Debug)]
pub struct ActivationReport {
    /// Result of the dependency provisioning step.
    pub provisioning: Result<ProvisionOutcome, ProvisionError>,
    /// Result of starting the language server.
    pub startup: Result<(), StartupError>,
}

impl ActivationReport {
    /// Whether the server is unavailable for this activation.
    pub fn is_degraded(&self) -> bool {
        self.startup.is_err()
    }
}

/// Result of a completed activation.
#[derive(Debug)]
pub struct Activation {
    api: Arc<SessionFacade>,
    report: ActivationReport,
}

impl Activation {
    /// The exported capability API.
    pub fn api(&self) -> &Arc<SessionFacade> {
        &self.api
    }

    /// How activation went.
    pub fn report(&self) -> &ActivationReport {
        &self.report
    }
}

/// Builder for [`TrlcExtension`].
pub struct TrlcExtensionBuilder {
    context: ExtensionContext,
    settings: Settings,
    installer: Option<Arc<dyn PackageInstaller>>,
    launcher: Option<Arc<dyn Launcher>>,
}

impl TrlcExtensionBuilder {
    /// Replaces the package installer.
    #[must_use]
    pub fn installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Replaces the server launcher.
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Builds the extension. Nothing runs until activation.
    ///
    /// # Errors
    /// [`ConfigError::InvalidPattern`] if a glob setting is malformed.
    pub fn build(self) -> Result<TrlcExtension, ConfigError> {
        let Self {
            context,
            settings,
            installer,
            launcher,
        } = self;

        // pip runs through the server's interpreter when one is configured
        let installer = installer.unwrap_or_else(|| {
            let pip = settings
                .interpreter_path
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map_or_else(PipInstaller::default, PipInstaller::new);
            Arc::new(pip) as Arc<dyn PackageInstaller>
        });

        let mut session = LanguageClientSession::builder()
            .watch_pattern(settings.file_watch_pattern.clone())
            .document_patterns(settings.document_patterns.clone())
            .init_timeout(settings.init_timeout())
            .request_timeout(settings.request_timeout())
            .shutdown_grace(settings.shutdown_grace())
            .launcher(launcher.unwrap_or_else(|| Arc::new(ProcessLauncher) as Arc<dyn Launcher>));
        if let Some(root) = &context.workspace_root {
            session = session.workspace_root(root);
        }

        Ok(TrlcExtension {
            context,
            settings,
            installer,
            session: Arc::new(session.build()?),
            activation: OnceCell::new(),
        })
    }
}

/// The primary TRLC extension.
pub struct TrlcExtension {
    context: ExtensionContext,
    settings: Settings,
    installer: Arc<dyn PackageInstaller>,
    session: Arc<LanguageClientSession>,
    activation: OnceCell<Activation>,
}

impl std::fmt::Debug for TrlcExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrlcExtension")
            .field("context", &self.context)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl TrlcExtension {
    /// Starts building the extension for `context`.
    pub fn builder(context: ExtensionContext, settings: Settings) -> TrlcExtensionBuilder {
        TrlcExtensionBuilder {
            context,
            settings,
            installer: None,
            launcher: None,
        }
    }

    /// The language client session.
    pub fn session(&self) -> &Arc<LanguageClientSession> {
        &self.session
    }

    /// Settings this extension was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Where the server's private dependencies are installed.
    pub fn dependency_directory(&self) -> PathBuf {
        self.context.extension_path.join(DEPENDENCY_DIR)
    }

    /// Directory of the compiled client entry point.
    pub fn client_entry_directory(&self) -> PathBuf {
        self.context.extension_path.join("client").join("out")
    }

    /// Activates once; later calls return the first activation.
    pub async fn activate(&self) -> &Activation {
        self.activation.get_or_init(|| self.run_activation()).await
    }

    async fn run_activation(&self) -> Activation {
        info!(
            extension = %self.context.extension_path.display(),
            mode = ?self.context.mode,
            "activating TRLC extension"
        );

        let provisioning = self.provision().await;
        if let Err(e) = &provisioning {
            warn!(error = %e, "continuing activation without provisioned dependencies");
        }

        let startup = self.start_server().await;
        if let Err(e) = &startup {
            error!(error = %e, "TRLC language features are unavailable");
        }

        Activation {
            api: Arc::new(SessionFacade::new(self.session.clone())),
            report: ActivationReport {
                provisioning,
                startup,
            },
        }
    }

    async fn provision(&self) -> Result<ProvisionOutcome, ProvisionError> {
        let package: PackageSpec = self.settings.dependency_package.parse()?;
        ensure_provisioned(
            self.context.workspace_state.as_ref(),
            self.installer.as_ref(),
            &self.dependency_directory(),
            &package,
        )
        .await
    }

    async fn start_server(&self) -> Result<(), StartupError> {
        let descriptor = build_launch_descriptor(
            self.context.mode,
            &self.client_entry_directory(),
            self.settings.interpreter_path.as_deref(),
        )?;
        self.session.start(&descriptor).await?;
        Ok(())
    }

    /// Stops the language server. Safe to call repeatedly.
    pub async fn deactivate(&self) {
        info!("deactivating TRLC extension");
        self.session.stop().await;
    }

    /// Runs a contributed command. Returns `false` for unknown commands.
    pub async fn execute_command(&self, command: &str) -> bool {
        match command {
            RESET_STATE_COMMAND => {
                match reset_provisioning(self.context.workspace_state.as_ref()).await {
                    Ok(()) => info!("provisioning state reset, dependencies reinstall on next activation"),
                    Err(e) => error!(error = %e, "failed to reset provisioning state"),
                }
                true
            }
            other => {
                warn!(command = other, "unknown command");
                false
            }
        }
    }
}

#[async_trait]
impl Extension for TrlcExtension {
    fn id(&self) -> &str {
        PRIMARY_EXTENSION_ID
    }

    async fn activate(&self) -> Result<Arc<dyn TrlcApi>, BridgeError> {
        let api: Arc<dyn TrlcApi> = TrlcExtension::activate(self).await.api().clone();
        Ok(api)
    }
}
