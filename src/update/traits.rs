use crate::error::Result;
use crate::update::installation::Target;
use crate::update::version::Version;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Reports the version of an installed binary.
#[async_trait]
pub trait VersionOracle: Send + Sync {
    /// Version of the binary at `path`.
    ///
    /// Returns `Ok(None)` when nothing is installed at `path`. Any other
    /// failure (unreadable file, unparseable output) is an `Err`, never
    /// `Ok(None)`.
    async fn version(&self, path: &Path) -> Result<Option<Version>>;
}

/// Decides whether a newer build exists on the remote side.
#[async_trait]
pub trait StalenessChecker: Send + Sync {
    /// `true` if a build newer than `current` is available for `target`.
    /// `current` is `None` when the application has never been installed.
    async fn is_newer_available(
        &self,
        target: Target,
        current: Option<&Version>,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Transfers the newest build of a target into a sink.
#[async_trait]
pub trait ArtifactDownloader: Send + Sync {
    /// Stream the newest `target` build into `sink`.
    ///
    /// `Ok(true)` means the transfer completed. The caller still verifies
    /// that something non-empty landed on disk.
    async fn download(
        &self,
        target: Target,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Starts executables. The started process is never waited on.
pub trait ProcessLauncher: Send + Sync {
    /// Start `path` with `args`.
    fn start(&self, path: &Path, args: &[OsString]) -> Result<()>;
}
