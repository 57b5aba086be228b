//! One-time provisioning of the language server's Python dependencies.
//!
//! The TRLC server imports its solver bindings from a private directory next
//! to the extension. Installing them is slow, so completion is remembered in
//! the workspace state under [`SETUP_DONE_KEY`] and skipped on later
//! activations until an operator resets it.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::error::ProvisionError;
use crate::state::StateStore;

/// Workspace state key holding the provisioning flag.
pub const SETUP_DONE_KEY: &str = "setupDone";

/// Directory, relative to the extension root, that receives the dependencies.
pub const DEPENDENCY_DIR: &str = "python-deps";

/// Package installed by default.
pub const DEFAULT_PACKAGE: &str = "cvc5==1.2.0";

/// Persisted provisioning flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    /// Dependencies were installed successfully.
    Done,
    /// Dependencies still need to be installed.
    NotDone,
}

impl ProvisioningState {
    /// Reads the flag. A missing or non-boolean value counts as `NotDone`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn load(store: &dyn StateStore) -> Result<Self, ProvisionError> {
        let value = store.get(SETUP_DONE_KEY).await?;
        Ok(match value {
            Some(Value::Bool(true)) => Self::Done,
            _ => Self::NotDone,
        })
    }
}

/// What [`ensure_provisioned`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The flag was already set; nothing ran.
    AlreadyProvisioned,
    /// The installer ran and the flag was set.
    Installed,
}

/// A `name==version` dependency constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Distribution name.
    pub name: String,
    /// Exact version.
    pub version: String,
}

impl PackageSpec {
    /// Creates a spec from its parts.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl FromStr for PackageSpec {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once("==") {
            Some((name, version)) if !name.trim().is_empty() && !version.trim().is_empty() => {
                Ok(Self::new(name.trim(), version.trim()))
            }
            _ => Err(ProvisionError::InvalidPackageSpec(s.to_string())),
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// Something that can install a package into a directory.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Installs `package` into `target`, returning the installer's output.
    ///
    /// # Errors
    /// Returns an error if the installer cannot run or reports failure.
    async fn install(&self, target: &Path, package: &PackageSpec)
    -> Result<String, ProvisionError>;
}

/// Installs packages with `python -m pip install --target`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
}

impl PipInstaller {
    /// Creates an installer that runs pip through `python`.
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Returns the python executable this installer uses.
    pub fn python(&self) -> &str {
        &self.python
    }
}

impl Default for PipInstaller {
    fn default() -> Self {
        let python = if cfg!(windows) { "python" } else { "python3" };
        Self::new(python)
    }
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    async fn install(
        &self,
        target: &Path,
        package: &PackageSpec,
    ) -> Result<String, ProvisionError> {
        let output = async_process::Command::new(&self.python)
            .args(["-m", "pip", "install", "--target"])
            .arg(target)
            .arg(package.to_string())
            .output()
            .await
            .map_err(|source| ProvisionError::InstallerUnavailable {
                program: self.python.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ProvisionError::InstallFailed {
                package: package.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Installs the server dependencies unless the workspace says they are there.
///
/// On failure the flag is left untouched so the next activation retries.
///
/// # Errors
/// Returns [`ProvisionError`] when the state cannot be read or the install fails.
pub async fn ensure_provisioned(
    store: &dyn StateStore,
    installer: &dyn PackageInstaller,
    target_directory: &Path,
    package: &PackageSpec,
) -> Result<ProvisionOutcome, ProvisionError> {
    if ProvisioningState::load(store).await? == ProvisioningState::Done {
        return Ok(ProvisionOutcome::AlreadyProvisioned);
    }

    info!(
        package = %package,
        target = %target_directory.display(),
        "installing language server dependencies"
    );

    match installer.install(target_directory, package).await {
        Ok(output) => {
            info!(package = %package, output = output.trim(), "dependencies installed");
            store.update(SETUP_DONE_KEY, Some(Value::Bool(true))).await?;
            Ok(ProvisionOutcome::Installed)
        }
        Err(e) => {
            error!(package = %package, error = %e, "dependency installation failed");
            Err(e)
        }
    }
}

/// Clears the provisioning flag so the next activation reinstalls.
///
/// # Errors
/// Returns an error if the store cannot be written.
pub async fn reset_provisioning(store: &dyn StateStore) -> Result<(), ProvisionError> {
    store.update(SETUP_DONE_KEY, None).await?;
    Ok(())
}
