//! Filesystem seam used by the swap engine and the orchestrator.
//!
//! Everything the update flow does to disk goes through [`FileSystem`] so
//! that the in-use and permission-denied cases can be reproduced in tests.

use std::io;
use std::path::Path;
use tokio::io::AsyncWrite;

/// Destination a download is streamed into.
pub type ArtifactSink = Box<dyn AsyncWrite + Send + Unpin>;

/// The file operations the update flow needs. All are synchronous except the
/// writes into an [`ArtifactSink`].
pub trait FileSystem: Send + Sync {
    /// `true` if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Size of the file at `path` in bytes.
    fn len(&self, path: &Path) -> io::Result<u64>;

    /// Remove the file at `path`.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Move `from` onto `to`, replacing `to` if the platform allows it.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy `from` over `to`, leaving `from` in place.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Create (or truncate) `path`, creating parent directories as needed.
    fn create(&self, path: &Path) -> io::Result<ArtifactSink>;

    /// Mark `path` executable. No-op where the platform has no such bit.
    fn set_executable(&self, path: &Path) -> io::Result<()>;
}

/// [`FileSystem`] backed by `std::fs` and `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn len(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        match std::fs::rename(from, to) {
            // The temp dir frequently lives on another mount (tmpfs).
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                tracing::debug!(
                    from = %from.display(),
                    to = %to.display(),
                    "rename crosses devices, falling back to copy + remove"
                );
                std::fs::copy(from, to)?;
                std::fs::remove_file(from)
            }
            other => other,
        }
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }

    fn create(&self, path: &Path) -> io::Result<ArtifactSink> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    fn set_executable(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        }
        #[cfg(not(unix))]
        {
            tracing::trace!(path = %path.display(), "no executable bit on this platform");
        }
        Ok(())
    }
}

/// Remove `path` and report whether it is gone afterwards.
///
/// A missing file counts as removed. Other failures are logged at debug
/// level; the caller decides what a surviving file means.
pub(crate) fn delete(fs: &dyn FileSystem, path: &Path) -> bool {
    if let Err(e) = fs.remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "delete failed");
    }
    !fs.exists(path)
}

/// `true` if `path` exists and holds at least one byte.
pub(crate) fn is_non_empty(fs: &dyn FileSystem, path: &Path) -> bool {
    fs.exists(path) && fs.len(path).is_ok_and(|len| len > 0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn create_writes_through_sink_and_makes_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("slot").join("app");
        let fs = OsFileSystem;

        let mut sink = fs.create(&path).unwrap();
        sink.write_all(b"payload").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        assert!(fs.exists(&path));
        assert_eq!(fs.len(&path).unwrap(), 7);
        assert!(is_non_empty(&fs, &path));
    }

    #[test]
    fn delete_treats_missing_file_as_removed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(delete(&OsFileSystem, &dir.path().join("never-existed")));
    }

    #[test]
    fn delete_removes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old");
        std::fs::write(&path, "x").unwrap();
        assert!(delete(&OsFileSystem, &path));
        assert!(!path.exists());
    }

    #[test]
    fn rename_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("new");
        let to = dir.path().join("real");
        std::fs::write(&from, "new-content").unwrap();
        std::fs::write(&to, "old-content").unwrap();

        OsFileSystem.rename(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "new-content");
    }

    #[test]
    fn copy_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("temp");
        let to = dir.path().join("real");
        std::fs::write(&from, "abc").unwrap();

        assert_eq!(OsFileSystem.copy(&from, &to).unwrap(), 3);
        assert!(from.exists());
        assert!(to.exists());
    }

    #[test]
    fn empty_file_is_not_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero");
        std::fs::write(&path, "").unwrap();
        assert!(!is_non_empty(&OsFileSystem, &path));
        assert!(!is_non_empty(&OsFileSystem, &dir.path().join("missing")));
    }

    #[cfg(unix)]
    #[test]
    fn set_executable_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, "#!/bin/sh\necho ok").unwrap();
        OsFileSystem.set_executable(&path).unwrap();
        let perms = std::fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o111, 0o111);
    }
}
