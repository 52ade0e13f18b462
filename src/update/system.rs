//! Default local adapters: version lookup via `--version` and detached
//! process start.

use crate::error::{LauncherError, Result};
use crate::update::traits::{ProcessLauncher, VersionOracle};
use crate::update::version::{Version, parse_version_output};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Default time allowed for `<binary> --version` to answer.
pub const DEFAULT_VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// [`VersionOracle`] that runs `<binary> --version` and parses the output.
#[derive(Debug, Clone)]
pub struct CommandVersionOracle {
    timeout: Duration,
}

impl Default for CommandVersionOracle {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_VERSION_TIMEOUT,
        }
    }
}

impl CommandVersionOracle {
    /// Create an oracle with a custom `--version` timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl VersionOracle for CommandVersionOracle {
    async fn version(&self, path: &Path) -> Result<Option<Version>> {
        if !path.exists() {
            return Ok(None);
        }

        let child = tokio::process::Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Ok(Err(e)) => {
                return Err(LauncherError::Version(format!(
                    "cannot run {} --version: {e}",
                    path.display()
                )));
            }
            Err(_) => {
                return Err(LauncherError::Version(format!(
                    "{} --version did not answer within {:?}",
                    path.display(),
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            return Err(LauncherError::Version(format!(
                "{} --version failed (exit code {:?})",
                path.display(),
                output.status.code()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_version_output(&stdout).map(Some).ok_or_else(|| {
            LauncherError::Version(format!(
                "no version in {} --version output: {:?}",
                path.display(),
                stdout.trim()
            ))
        })
    }
}

/// [`ProcessLauncher`] that spawns a detached child with inherited stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessLauncher;

impl ProcessLauncher for OsProcessLauncher {
    fn start(&self, path: &Path, args: &[OsString]) -> Result<()> {
        let child = std::process::Command::new(path)
            .args(args)
            .spawn()
            .map_err(|e| LauncherError::Launch(format!("cannot start {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), pid = child.id(), "process started");
        Ok(())
    }
}
