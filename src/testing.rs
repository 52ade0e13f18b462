//! In-memory filesystem and scripted collaborators for exercising the update
//! flow without touching disk or network.
//!
//! Compiled for unit tests and behind the `test-support` feature for
//! integration tests.

use crate::error::{LauncherError, Result};
use crate::update::fs::{ArtifactSink, FileSystem};
use crate::update::installation::Target;
use crate::update::traits::{ArtifactDownloader, ProcessLauncher, StalenessChecker, VersionOracle};
use crate::update::version::Version;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn denied(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("{} is in use", path.display()),
    )
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<PathBuf, Vec<u8>>,
    locked: HashSet<PathBuf>,
}

/// A [`FileSystem`] held in memory.
///
/// A *locked* path behaves like a binary some process is executing on
/// Windows: it cannot be removed, truncated or overwritten, but it can be
/// renamed (and the lock moves with it). Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFileSystem {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a file at `path` with `contents`.
    pub fn insert(&self, path: impl AsRef<Path>, contents: &[u8]) {
        guard(&self.state)
            .files
            .insert(path.as_ref().to_path_buf(), contents.to_vec());
    }

    /// Contents of the file at `path`, if any.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        guard(&self.state).files.get(path.as_ref()).cloned()
    }

    /// Mark `path` as in use.
    pub fn lock(&self, path: impl AsRef<Path>) {
        guard(&self.state).locked.insert(path.as_ref().to_path_buf());
    }

    /// Release a lock taken with [`MemoryFileSystem::lock`].
    pub fn unlock(&self, path: impl AsRef<Path>) {
        guard(&self.state).locked.remove(path.as_ref());
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        guard(&self.state).files.len()
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        guard(&self.state).files.contains_key(path)
    }

    fn len(&self, path: &Path) -> io::Result<u64> {
        guard(&self.state)
            .files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut state = guard(&self.state);
        if state.locked.contains(path) {
            return Err(denied(path));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = guard(&self.state);
        if state.locked.contains(to) {
            return Err(denied(to));
        }
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        state.files.insert(to.to_path_buf(), data);
        if state.locked.remove(from) {
            state.locked.insert(to.to_path_buf());
        }
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut state = guard(&self.state);
        if state.locked.contains(to) {
            return Err(denied(to));
        }
        let data = state
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let len = data.len() as u64;
        state.files.insert(to.to_path_buf(), data);
        Ok(len)
    }

    fn create(&self, path: &Path) -> io::Result<ArtifactSink> {
        let mut state = guard(&self.state);
        if state.locked.contains(path) {
            return Err(denied(path));
        }
        state.files.insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemorySink {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
        }))
    }

    fn set_executable(&self, path: &Path) -> io::Result<()> {
        if self.exists(path) {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }
}

struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    path: PathBuf,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = guard(&self.state);
        match state.files.get_mut(&self.path) {
            Some(data) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            None => Poll::Ready(Err(io::Error::from(io::ErrorKind::NotFound))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// [`VersionOracle`] answering from a fixed table. Unknown paths are absent.
#[derive(Debug, Default)]
pub struct StaticVersionOracle {
    versions: HashMap<PathBuf, Version>,
    failing: HashSet<PathBuf>,
}

impl StaticVersionOracle {
    /// Create an oracle that reports every path as absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `version` for `path`.
    ///
    /// # Panics
    ///
    /// Panics if `version` does not parse.
    #[allow(clippy::expect_used)]
    pub fn with(mut self, path: impl AsRef<Path>, version: &str) -> Self {
        let parsed = version.parse().expect("valid version literal");
        self.versions.insert(path.as_ref().to_path_buf(), parsed);
        self
    }

    /// Fail every lookup for `path`.
    pub fn failing(mut self, path: impl AsRef<Path>) -> Self {
        self.failing.insert(path.as_ref().to_path_buf());
        self
    }
}

#[async_trait]
impl VersionOracle for StaticVersionOracle {
    async fn version(&self, path: &Path) -> Result<Option<Version>> {
        if self.failing.contains(path) {
            return Err(LauncherError::Version(format!(
                "cannot read {}",
                path.display()
            )));
        }
        Ok(self.versions.get(path).cloned())
    }
}

/// [`StalenessChecker`] with a fixed answer per target that records its calls.
#[derive(Debug, Default)]
pub struct ScriptedChecker {
    launcher_stale: bool,
    application_stale: bool,
    failing: Option<Target>,
    calls: Mutex<Vec<(Target, Option<Version>)>>,
}

impl ScriptedChecker {
    /// Create a checker reporting whether each target is stale.
    pub fn new(launcher_stale: bool, application_stale: bool) -> Self {
        Self {
            launcher_stale,
            application_stale,
            ..Self::default()
        }
    }

    /// Fail the check for `target`.
    pub fn failing_for(mut self, target: Target) -> Self {
        self.failing = Some(target);
        self
    }

    /// Every `(target, current version)` pair asked about, in order.
    pub fn calls(&self) -> Vec<(Target, Option<Version>)> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl StalenessChecker for ScriptedChecker {
    async fn is_newer_available(
        &self,
        target: Target,
        current: Option<&Version>,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        guard(&self.calls).push((target, current.cloned()));
        if self.failing == Some(target) {
            return Err(LauncherError::Http(format!("{target} feed unreachable")));
        }
        Ok(match target {
            Target::Launcher => self.launcher_stale,
            Target::Application => self.application_stale,
        })
    }
}

/// How a [`ScriptedDownloader`] responds for one target.
#[derive(Debug, Clone)]
pub enum DownloadScript {
    /// Write the bytes and report completion.
    Payload(Vec<u8>),
    /// Write the bytes but report failure.
    Incomplete(Vec<u8>),
    /// Return an error without writing.
    Error,
    /// Write the bytes, then wait until cancelled.
    Stall(Vec<u8>),
}

/// [`ArtifactDownloader`] playing back a [`DownloadScript`] per target.
#[derive(Debug, Default)]
pub struct ScriptedDownloader {
    scripts: HashMap<Target, DownloadScript>,
    calls: Mutex<Vec<Target>>,
}

impl ScriptedDownloader {
    /// Create a downloader with no scripts; unscripted targets write nothing
    /// and report completion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to downloads of `target` with `script`.
    pub fn with(mut self, target: Target, script: DownloadScript) -> Self {
        self.scripts.insert(target, script);
        self
    }

    /// Targets downloaded, in order.
    pub fn calls(&self) -> Vec<Target> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl ArtifactDownloader for ScriptedDownloader {
    async fn download(
        &self,
        target: Target,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<bool> {
        guard(&self.calls).push(target);
        match self.scripts.get(&target) {
            None => Ok(true),
            Some(DownloadScript::Payload(bytes)) => {
                sink.write_all(bytes).await?;
                Ok(true)
            }
            Some(DownloadScript::Incomplete(bytes)) => {
                sink.write_all(bytes).await?;
                Ok(false)
            }
            Some(DownloadScript::Error) => {
                Err(LauncherError::Transfer(format!("{target} transfer reset")))
            }
            Some(DownloadScript::Stall(bytes)) => {
                sink.write_all(bytes).await?;
                cancel.cancelled().await;
                Ok(false)
            }
        }
    }
}

/// A process start recorded by [`RecordingLauncher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    /// Executable path.
    pub path: PathBuf,
    /// Arguments passed.
    pub args: Vec<OsString>,
}

/// [`ProcessLauncher`] that records starts instead of spawning.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    fail: bool,
    started: Mutex<Vec<StartedProcess>>,
}

impl RecordingLauncher {
    /// A launcher whose starts succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher whose starts all fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every start attempted, in order.
    pub fn started(&self) -> Vec<StartedProcess> {
        guard(&self.started).clone()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn start(&self, path: &Path, args: &[OsString]) -> Result<()> {
        guard(&self.started).push(StartedProcess {
            path: path.to_path_buf(),
            args: args.to_vec(),
        });
        if self.fail {
            Err(LauncherError::Launch(format!("cannot start {}", path.display())))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn memory_sink_appends_to_file() {
        let fs = MemoryFileSystem::new();
        let mut sink = fs.create(Path::new("/slot/app")).unwrap();
        sink.write_all(b"ab").await.unwrap();
        sink.write_all(b"cd").await.unwrap();
        assert_eq!(fs.contents("/slot/app").unwrap(), b"abcd");
        assert_eq!(fs.len(Path::new("/slot/app")).unwrap(), 4);
    }

    #[test]
    fn locked_file_survives_remove_but_moves_on_rename() {
        let fs = MemoryFileSystem::new();
        fs.insert("/a", b"x");
        fs.lock("/a");
        assert!(fs.remove_file(Path::new("/a")).is_err());
        assert!(fs.create(Path::new("/a")).is_err());

        fs.rename(Path::new("/a"), Path::new("/b")).unwrap();
        assert!(!fs.exists(Path::new("/a")));
        assert!(fs.remove_file(Path::new("/b")).is_err());

        fs.unlock("/b");
        fs.remove_file(Path::new("/b")).unwrap();
        assert_eq!(fs.file_count(), 0);
    }
}
