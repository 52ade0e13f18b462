//! Update orchestration: finalize a pending self-update, bring the launcher
//! current, bring the application current, then start the right binary.
//!
//! One [`Orchestrator`] covers one process invocation. Nothing is persisted
//! besides the binaries themselves and the temp launcher file.

use crate::error::{LauncherError, Result};
use crate::update::fs::{FileSystem, OsFileSystem, delete, is_non_empty};
use crate::update::installation::{Installation, RelaunchArgs, Target};
use crate::update::swap::{ExecutingFrom, FinalizeReport, PendingUpdate, SwapEngine};
use crate::update::system::{CommandVersionOracle, OsProcessLauncher};
use crate::update::traits::{ArtifactDownloader, ProcessLauncher, StalenessChecker, VersionOracle};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts a relaunched launcher makes to promote itself. The previous
/// generation may still be exiting and holding the real path.
pub const DEFAULT_PROMOTE_ATTEMPTS: u32 = 5;

/// Pause between promotion attempts.
pub const DEFAULT_PROMOTE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Terminal result of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The application was started (after an update or directly).
    LaunchedApplication,
    /// A freshly downloaded launcher was started from the temp slot.
    LaunchedNewLauncher,
    /// The download failed or left a missing/empty file.
    DownloadFailed(Target),
    /// The downloaded file could not replace the real one.
    SwapFailed(Target),
    /// The process could not be started.
    LaunchFailed(Target),
    /// Version lookup or staleness check failed.
    CheckFailed(Target),
    /// The run was cancelled before it could finish.
    Cancelled,
}

impl UpdateOutcome {
    /// `true` for the `Launched*` outcomes.
    pub fn is_success(self) -> bool {
        matches!(self, Self::LaunchedApplication | Self::LaunchedNewLauncher)
    }

    /// Process exit code: 0 for any launch, 1 for any failure.
    pub fn exit_code(self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LaunchedApplication => write!(f, "launched application"),
            Self::LaunchedNewLauncher => write!(f, "launched new launcher"),
            Self::DownloadFailed(t) => write!(f, "{t} download failed"),
            Self::SwapFailed(t) => write!(f, "{t} replacement failed"),
            Self::LaunchFailed(t) => write!(f, "{t} failed to start"),
            Self::CheckFailed(t) => write!(f, "{t} version check failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything an [`Orchestrator`] is built from, validated once by
/// [`Orchestrator::new`].
///
/// `application_path`, a downloader and a checker are required. Everything
/// else falls back to a default: the current executable for the launcher,
/// the OS temp dir, [`CommandVersionOracle`], [`OsProcessLauncher`] and
/// [`OsFileSystem`].
#[derive(Clone)]
pub struct OrchestratorConfig {
    application_path: PathBuf,
    launcher_path: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    downloader: Option<Arc<dyn ArtifactDownloader>>,
    checker: Option<Arc<dyn StalenessChecker>>,
    version_oracle: Option<Arc<dyn VersionOracle>>,
    process_launcher: Option<Arc<dyn ProcessLauncher>>,
    file_system: Option<Arc<dyn FileSystem>>,
    promote_attempts: u32,
    promote_retry_delay: Duration,
}

impl OrchestratorConfig {
    /// Start a config for the application at `application_path`.
    pub fn new(application_path: impl Into<PathBuf>) -> Self {
        Self {
            application_path: application_path.into(),
            launcher_path: None,
            temp_dir: None,
            downloader: None,
            checker: None,
            version_oracle: None,
            process_launcher: None,
            file_system: None,
            promote_attempts: DEFAULT_PROMOTE_ATTEMPTS,
            promote_retry_delay: DEFAULT_PROMOTE_RETRY_DELAY,
        }
    }

    /// Set the artifact downloader (required).
    pub fn with_downloader(mut self, downloader: Arc<dyn ArtifactDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Set the staleness checker (required).
    pub fn with_checker(mut self, checker: Arc<dyn StalenessChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Override where the launcher binary lives instead of using the
    /// current executable. The relaunch flag still takes precedence.
    pub fn with_launcher_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.launcher_path = Some(path.into());
        self
    }

    /// Override the directory holding the temp slots.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Override the version oracle.
    pub fn with_version_oracle(mut self, oracle: Arc<dyn VersionOracle>) -> Self {
        self.version_oracle = Some(oracle);
        self
    }

    /// Override the process launcher.
    pub fn with_process_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.process_launcher = Some(launcher);
        self
    }

    /// Override the filesystem.
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// How often a relaunched launcher retries promoting itself, and how
    /// long it waits between attempts. `attempts` is clamped to at least 1.
    pub fn with_promote_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.promote_attempts = attempts.max(1);
        self.promote_retry_delay = delay;
        self
    }
}

/// Drives one update-and-launch run.
pub struct Orchestrator {
    installation: Installation,
    args: RelaunchArgs,
    fs: Arc<dyn FileSystem>,
    downloader: Arc<dyn ArtifactDownloader>,
    checker: Arc<dyn StalenessChecker>,
    oracle: Arc<dyn VersionOracle>,
    launcher: Arc<dyn ProcessLauncher>,
    promote_attempts: u32,
    promote_retry_delay: Duration,
}

/// How a download step ended.
enum Transfer {
    Completed,
    Failed,
    Cancelled,
}

impl Orchestrator {
    /// Validate `config` against the filesystem and the process arguments.
    ///
    /// `args` is the argument vector without the program name. The reserved
    /// relaunch pair is split out here and never forwarded.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] if the downloader or checker is
    /// missing, the launcher binary cannot be located or does not exist, a
    /// path has no file name, or a temp slot resolves to a real binary or to
    /// the other temp slot.
    pub fn new<I>(config: OrchestratorConfig, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let downloader = config.downloader.ok_or_else(|| {
            LauncherError::Config("a downloader is required to run the launcher".to_owned())
        })?;
        let checker = config.checker.ok_or_else(|| {
            LauncherError::Config("a version checker is required to run the launcher".to_owned())
        })?;

        let fs = config
            .file_system
            .unwrap_or_else(|| Arc::new(OsFileSystem));
        let args = RelaunchArgs::parse(args);

        let launcher_path = match (args.launcher_path_before_update(), config.launcher_path) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => path,
            (None, None) => std::env::current_exe().map_err(|e| {
                LauncherError::Config(format!("cannot determine current executable path: {e}"))
            })?,
        };
        if !fs.exists(&launcher_path) {
            return Err(LauncherError::Config(format!(
                "launcher binary {} does not exist",
                launcher_path.display()
            )));
        }

        let temp_dir = config.temp_dir.unwrap_or_else(std::env::temp_dir);
        let installation = Installation::new(launcher_path, config.application_path, temp_dir)?;
        installation.ensure_distinct_slots()?;

        Ok(Self {
            installation,
            args,
            fs,
            downloader,
            checker,
            oracle: config
                .version_oracle
                .unwrap_or_else(|| Arc::new(CommandVersionOracle::default())),
            launcher: config
                .process_launcher
                .unwrap_or_else(|| Arc::new(OsProcessLauncher)),
            promote_attempts: config.promote_attempts,
            promote_retry_delay: config.promote_retry_delay,
        })
    }

    /// The installation this orchestrator manages.
    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    /// The arguments forwarded to started processes.
    pub fn args(&self) -> &RelaunchArgs {
        &self.args
    }

    /// Run the full flow and return its outcome. Never panics on update
    /// failures; every failure is logged and reported as an outcome.
    pub async fn run(&self, cancel: &CancellationToken) -> UpdateOutcome {
        let temp_launcher = self.installation.temp_launcher_path();
        let pending = PendingUpdate::probe(self.fs.as_ref(), &temp_launcher);
        self.finalize_pending(pending, &temp_launcher).await;

        if cancel.is_cancelled() {
            return UpdateOutcome::Cancelled;
        }
        match self.is_stale(Target::Launcher, cancel).await {
            Err(outcome) => return outcome,
            Ok(true) => return self.update_launcher(cancel).await,
            Ok(false) => debug!("launcher is current"),
        }

        if cancel.is_cancelled() {
            return UpdateOutcome::Cancelled;
        }
        match self.is_stale(Target::Application, cancel).await {
            Err(outcome) => outcome,
            Ok(true) => self.update_application(cancel).await,
            Ok(false) => {
                debug!("application is current");
                self.start_application()
            }
        }
    }

    /// Resolve a temp launcher left by a previous run. Failure is logged and
    /// the run continues with whatever launcher is on disk.
    async fn finalize_pending(&self, pending: PendingUpdate, temp_launcher: &Path) {
        if pending == PendingUpdate::NoPendingUpdate {
            return;
        }

        let real = self.installation.launcher_path();
        let executing_from = if self.args.is_relaunch() {
            ExecutingFrom::TempSlot
        } else {
            ExecutingFrom::RealPath
        };
        let attempts = match executing_from {
            ExecutingFrom::TempSlot => self.promote_attempts,
            ExecutingFrom::RealPath => 1,
        };

        let engine = SwapEngine::new(self.fs.as_ref());
        for attempt in 1..=attempts {
            match engine.finalize(pending, temp_launcher, real, executing_from) {
                Ok(FinalizeReport::PromotedTemp) => {
                    info!(launcher = %real.display(), "self-update finalized");
                    return;
                }
                Ok(report) => {
                    debug!(?report, "pending launcher resolved");
                    return;
                }
                Err(e) if attempt < attempts => {
                    debug!(attempt, error = %e, "launcher promotion failed, retrying");
                    tokio::time::sleep(self.promote_retry_delay).await;
                }
                Err(e) => {
                    warn!(error = %e, "could not finalize pending launcher update, continuing");
                }
            }
        }
    }

    /// Ask the oracle and the checker whether `target` needs an update.
    async fn is_stale(
        &self,
        target: Target,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, UpdateOutcome> {
        let path = self.installation.real_path(target);

        let current = match guarded(cancel, self.oracle.version(path)).await {
            None => return Err(UpdateOutcome::Cancelled),
            Some(Ok(version)) => version,
            Some(Err(e)) => {
                error!(%target, error = %e, "version lookup failed");
                return Err(UpdateOutcome::CheckFailed(target));
            }
        };

        if target == Target::Launcher && current.is_none() {
            error!(path = %path.display(), "launcher reports no version");
            return Err(UpdateOutcome::CheckFailed(target));
        }

        let newer = self
            .checker
            .is_newer_available(target, current.as_ref(), cancel);
        let newer = match guarded(cancel, newer).await {
            None => return Err(UpdateOutcome::Cancelled),
            Some(Ok(newer)) => newer,
            Some(Err(e)) => {
                error!(%target, error = %e, "staleness check failed");
                return Err(UpdateOutcome::CheckFailed(target));
            }
        };

        match (&current, newer) {
            (None, false) => {
                info!(%target, "not installed yet, installing despite checker");
                Ok(true)
            }
            (Some(version), true) => {
                info!(%target, %version, "newer version available");
                Ok(true)
            }
            (None, true) => {
                info!(%target, "not installed yet, newer version available");
                Ok(true)
            }
            (Some(_), false) => Ok(false),
        }
    }

    /// Download a new launcher into its temp slot and start it from there.
    async fn update_launcher(&self, cancel: &CancellationToken) -> UpdateOutcome {
        let temp = self.installation.temp_launcher_path();
        if self.args.is_relaunch() && self.fs.exists(&temp) {
            warn!(
                path = %temp.display(),
                "this launcher was not promoted and still runs from the temp slot; \
                 the new download has to overwrite the running binary"
            );
        }
        match self.download(Target::Launcher, &temp, cancel).await {
            Transfer::Completed => {}
            Transfer::Failed => return UpdateOutcome::DownloadFailed(Target::Launcher),
            Transfer::Cancelled => return UpdateOutcome::Cancelled,
        }
        if let Err(e) = self.fs.set_executable(&temp) {
            warn!(path = %temp.display(), error = %e, "cannot mark new launcher executable");
        }

        let args = self.args.for_new_launcher(self.installation.launcher_path());
        match self.launcher.start(&temp, &args) {
            Ok(()) => {
                info!(path = %temp.display(), "started new launcher");
                UpdateOutcome::LaunchedNewLauncher
            }
            Err(e) => {
                error!(error = %e, "error while trying to start new launcher");
                UpdateOutcome::LaunchFailed(Target::Launcher)
            }
        }
    }

    /// Download a new application, replace the real one, then start it.
    async fn update_application(&self, cancel: &CancellationToken) -> UpdateOutcome {
        let temp = self.installation.temp_application_path();
        match self.download(Target::Application, &temp, cancel).await {
            Transfer::Completed => {}
            Transfer::Failed => return UpdateOutcome::DownloadFailed(Target::Application),
            Transfer::Cancelled => return UpdateOutcome::Cancelled,
        }
        if cancel.is_cancelled() {
            return UpdateOutcome::Cancelled;
        }

        if !self.replace_application(&temp) {
            error!("error occurred while replacing the old application with the new one");
            return UpdateOutcome::SwapFailed(Target::Application);
        }
        let real = self.installation.application_path();
        if let Err(e) = self.fs.set_executable(real) {
            warn!(path = %real.display(), error = %e, "cannot mark application executable");
        }

        self.start_application()
    }

    /// Delete the real application, then copy the temp file over it.
    ///
    /// Never copies over a file that could not be removed. The temp file is
    /// left in place either way.
    fn replace_application(&self, temp: &Path) -> bool {
        let real = self.installation.application_path();
        if !delete(self.fs.as_ref(), real) {
            error!(path = %real.display(), "cannot remove old application");
            return false;
        }
        if let Err(e) = self.fs.copy(temp, real) {
            error!(from = %temp.display(), to = %real.display(), error = %e, "copy failed");
            return false;
        }
        self.fs.exists(real) && self.fs.exists(temp)
    }

    fn start_application(&self) -> UpdateOutcome {
        let path = self.installation.application_path();
        match self.launcher.start(path, self.args.passthrough()) {
            Ok(()) => {
                info!(path = %path.display(), "started application");
                UpdateOutcome::LaunchedApplication
            }
            Err(e) => {
                error!(error = %e, "error while trying to start application");
                UpdateOutcome::LaunchFailed(Target::Application)
            }
        }
    }

    /// Stream `target` into `dest` and check that a non-empty file landed.
    ///
    /// A failed or empty transfer leaves `dest` behind; a cancelled one
    /// removes it so a partial file is never mistaken for an artifact.
    async fn download(&self, target: Target, dest: &Path, cancel: &CancellationToken) -> Transfer {
        let mut sink = match self.fs.create(dest) {
            Ok(sink) => sink,
            Err(e) => {
                error!(%target, path = %dest.display(), error = %e, "cannot create temp file");
                return Transfer::Failed;
            }
        };

        info!(%target, path = %dest.display(), "downloading");
        let result = guarded(cancel, self.downloader.download(target, sink.as_mut(), cancel)).await;
        let flushed = sink.shutdown().await;
        drop(sink);

        let completed = match result {
            None => {
                warn!(%target, "download cancelled, removing partial file");
                delete(self.fs.as_ref(), dest);
                return Transfer::Cancelled;
            }
            Some(Ok(completed)) => completed,
            Some(Err(e)) => {
                error!(%target, error = %e, "download failed");
                return Transfer::Failed;
            }
        };

        if let Err(e) = flushed {
            error!(%target, error = %e, "cannot flush downloaded file");
            return Transfer::Failed;
        }
        if !completed {
            error!(%target, "downloader reported an incomplete transfer");
            return Transfer::Failed;
        }
        if !is_non_empty(self.fs.as_ref(), dest) {
            error!(%target, path = %dest.display(), "downloaded file is missing or empty");
            return Transfer::Failed;
        }
        Transfer::Completed
    }
}

/// Await `fut` unless `cancel` fires first.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
