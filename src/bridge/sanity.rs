//! Workspace sanity checks run by an external script.
//!
//! The script is invoked as `<interpreter> <script> <workspace>`. It prints a
//! JSON array of findings to stdout and exits non-zero when it found errors.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::ExternalToolError;

/// One problem reported by the script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Finding {
    /// File the finding is about.
    pub file: String,
    /// What is wrong.
    pub message: String,
    /// 1-indexed line, when the script knows it.
    #[serde(default)]
    pub line: Option<u32>,
}

/// Outcome of one sanity check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityReport {
    /// Whether the script exited successfully.
    pub passed: bool,
    /// Everything the script reported.
    pub findings: Vec<Finding>,
}

/// Runs the sanity check script.
#[derive(Debug, Clone)]
pub struct SanityCheckRunner {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

impl SanityCheckRunner {
    /// Creates a runner with a 5 minute timeout.
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the checks over `workspace` and waits for the result.
    ///
    /// # Errors
    /// Spawn failures, timeouts, and failures without parseable findings.
    pub async fn run(&self, workspace: &Path) -> Result<SanityReport, ExternalToolError> {
        let mut cmd = async_process::Command::new(&self.interpreter);
        cmd.arg(&self.script)
            .arg(workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ExternalToolError::Timeout(self.timeout))?
            .map_err(|source| ExternalToolError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let findings = parse_findings(&stdout);

        if output.status.success() {
            let findings = findings.map_err(|e| {
                ExternalToolError::InvalidOutput(format!("sanity check output is not JSON: {e}"))
            })?;
            return Ok(SanityReport {
                passed: true,
                findings,
            });
        }

        match findings {
            Ok(findings) if !findings.is_empty() => Ok(SanityReport {
                passed: false,
                findings,
            }),
            _ => Err(ExternalToolError::Failed {
                program: self.script.display().to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// Runs the checks in the background. Results and errors are logged.
    pub fn spawn_detached(self, workspace: PathBuf) -> JoinHandle<Option<SanityReport>> {
        tokio::spawn(async move {
            match self.run(&workspace).await {
                Ok(report) => {
                    log_report(&report);
                    Some(report)
                }
                Err(e) => {
                    error!(error = %e, workspace = %workspace.display(), "sanity checks did not run");
                    None
                }
            }
        })
    }
}

fn parse_findings(stdout: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(stdout)
}

fn log_report(report: &SanityReport) {
    if report.passed {
        info!(findings = report.findings.len(), "sanity checks passed");
    } else {
        warn!(findings = report.findings.len(), "sanity checks failed");
    }
    for finding in &report.findings {
        warn!(file = %finding.file, line = ?finding.line, "{}", finding.message);
    }
}
