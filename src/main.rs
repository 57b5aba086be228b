//! TRLC language client - Entry Point
//!
//! Hosts the TRLC extension and its dependent bridge outside an editor.
//! It sets up logging, parses arguments, and runs one command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use trlc_client::api::TrlcApi;
use trlc_client::bridge::DependentExtension;
use trlc_client::config::Settings;
use trlc_client::extension::{RESET_STATE_COMMAND, TrlcExtension};
use trlc_client::host::{ExtensionContext, ExtensionRegistry};
use trlc_client::launch::ExecutionMode;
use trlc_client::lsp::types::{hover_text, to_lsp_position};
use trlc_client::state::JsonStateStore;

/// Editor-independent host for the TRLC language client.
#[derive(Parser, Debug)]
#[command(name = "trlc-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root directory.
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Extension install directory (holds client/out and python-deps).
    #[arg(long, global = true)]
    extension_path: Option<PathBuf>,

    /// Settings file [default: <workspace>/.vscode/settings.json].
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Workspace state file [default: <workspace>/.trlc/state.json].
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Execution mode of the server.
    #[arg(long, value_enum, default_value_t = ExecutionMode::Production, global = true)]
    mode: ExecutionMode,

    /// Python interpreter, overriding `python.defaultInterpreterPath`.
    #[arg(long, global = true)]
    interpreter: Option<String>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Activate the extensions, open documents, and run until Ctrl-C.
    Run {
        /// TRLC documents to open.
        files: Vec<PathBuf>,
    },
    /// Print hover information at a 1-indexed position.
    Hover {
        /// Document to query.
        #[arg(long)]
        file: PathBuf,
        /// Line, starting at 1.
        #[arg(long)]
        line: u32,
        /// Column, starting at 1.
        #[arg(long)]
        column: u32,
    },
    /// Forget that dependencies were installed.
    ResetState,
    /// Run the workspace sanity check script.
    SanityCheck,
    /// Write a settings file with default values.
    InitSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    /// Parses the log level string into a tracing Level.
    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => bail!("invalid log level: {}", other),
        }
    }

    fn settings_path(&self, workspace: &Path) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(|| workspace.join(".vscode").join("settings.json"))
    }

    fn state_path(&self, workspace: &Path) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| workspace.join(".trlc").join("state.json"))
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(level: Level, format: LogFormat) -> Result<()> {
    // Create an env filter that respects RUST_LOG but has a default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "trlc_client={level},trlc_server={level},async_lsp={level}"
        ))
    });

    // Logs go to stderr; stdout carries command output
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .context("failed to initialize tracing subscriber")?;

    Ok(())
}

/// Everything a command needs about its environment.
struct Environment {
    workspace: PathBuf,
    settings_path: PathBuf,
    settings: Settings,
    context: ExtensionContext,
}

fn environment(args: &Args) -> Result<Environment> {
    // Canonicalize the workspace path
    let workspace = args.workspace.canonicalize().context(format!(
        "failed to canonicalize workspace path: {}",
        args.workspace.display()
    ))?;

    let settings_path = args.settings_path(&workspace);
    let mut settings = Settings::load(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    if let Some(interpreter) = &args.interpreter {
        settings.interpreter_path = Some(interpreter.clone());
    }

    let extension_path = match &args.extension_path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let context = ExtensionContext {
        extension_path,
        mode: args.mode,
        workspace_root: Some(workspace.clone()),
        workspace_state: Arc::new(JsonStateStore::new(args.state_path(&workspace))),
    };

    Ok(Environment {
        workspace,
        settings_path,
        settings,
        context,
    })
}

async fn run(env: Environment, files: Vec<PathBuf>) -> Result<()> {
    let extension = Arc::new(
        TrlcExtension::builder(env.context, env.settings.clone())
            .build()
            .context("invalid settings")?,
    );
    let mut registry = ExtensionRegistry::new();
    registry.register(extension.clone());

    let report = extension.activate().await.report();
    if report.is_degraded() {
        warn!("running without a language server");
    }

    let bridge = DependentExtension::new(env.settings, Some(env.workspace));
    let features = bridge.discover_and_compose(&registry).await;

    for file in &files {
        match extension.session().open_document(file).await {
            Ok(uri) => {
                let Some(features) = &features else { continue };
                let text = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?;
                for decoration in features.decorations.decorations(&uri, &text).await {
                    info!(
                        file = %file.display(),
                        line = decoration.range.start.line + 1,
                        item = %decoration.item_id,
                        hover = decoration.hover.as_deref().unwrap_or(""),
                        "tracker reference"
                    );
                }
                if let Some(lookup) = &features.lookup {
                    for summary in lookup.summaries(&text).await {
                        println!("{summary}\n");
                    }
                }
            }
            Err(e) => warn!(file = %file.display(), error = %e, "could not open document"),
        }
    }

    info!("running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    extension.deactivate().await;
    info!("TRLC client shut down gracefully");
    Ok(())
}

async fn hover(env: Environment, file: &Path, line: u32, column: u32) -> Result<()> {
    let position = to_lsp_position(line, column)?;
    let extension = TrlcExtension::builder(env.context, env.settings)
        .build()
        .context("invalid settings")?;

    let activation = extension.activate().await;
    if let Err(e) = &activation.report().startup {
        bail!("{e}");
    }

    let result = async {
        let uri = extension.session().open_document(file).await?;
        Ok::<_, anyhow::Error>(activation.api().hover_details(uri, position).await)
    }
    .await;
    extension.deactivate().await;

    match result? {
        Some(hover) => println!("{}", hover_text(hover.contents)),
        None => println!("no hover information at {}:{line}:{column}", file.display()),
    }
    Ok(())
}

async fn sanity_check(env: Environment) -> Result<()> {
    let bridge = DependentExtension::new(env.settings, Some(env.workspace.clone()));
    let runner = bridge
        .sanity_runner()
        .context("`trlcTools.sanityChecks.script` is not set")?;

    let report = runner.run(&env.workspace).await?;
    for finding in &report.findings {
        match finding.line {
            Some(line) => println!("{}:{}: {}", finding.file, line, finding.message),
            None => println!("{}: {}", finding.file, finding.message),
        }
    }
    if !report.passed {
        bail!("sanity checks failed with {} finding(s)", report.findings.len());
    }
    println!("sanity checks passed");
    Ok(())
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args.parse_log_level()?;
    init_tracing(log_level, args.log_format)?;

    let env = environment(&args)?;
    info!(
        workspace = %env.workspace.display(),
        extension = %env.context.extension_path.display(),
        "starting TRLC client"
    );

    match args.command {
        Command::Run { files } => run(env, files).await,
        Command::Hover { file, line, column } => hover(env, &file, line, column).await,
        Command::ResetState => {
            let extension = TrlcExtension::builder(env.context, env.settings)
                .build()
                .context("invalid settings")?;
            extension.execute_command(RESET_STATE_COMMAND).await;
            Ok(())
        }
        Command::SanityCheck => sanity_check(env).await,
        Command::InitSettings => {
            Settings::write_default(&env.settings_path)?;
            println!("wrote default settings to {}", env.settings_path.display());
            Ok(())
        }
    }
}
