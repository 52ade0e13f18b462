//! Self-replacement protocol for the launcher binary.
//!
//! A running executable generally cannot delete or overwrite its own file,
//! so a new launcher is staged in a temp slot, started from there, and
//! promoted onto the real path by whichever launcher generation finds the
//! temp file on its next start. The presence of the temp launcher file is
//! the only durable "update pending" signal.
//!
//! Finalize order when the temp file exists:
//!
//! 1. Delete the temp file. If it is gone afterwards, nothing was running
//!    from it and it was a leftover: done.
//! 2. Otherwise delete the real launcher and move the temp file onto the
//!    real path, promoting the running copy.
//!
//! A launcher started with the relaunch flag knows it runs from the temp
//! slot and goes straight to step 2. On Unix an unlink of a running image
//! succeeds, so step 1 would throw the new launcher away.

use crate::error::{LauncherError, Result};
use crate::update::fs::{FileSystem, delete};
use std::path::Path;

/// Pending-update state, read once from the filesystem at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingUpdate {
    /// No temp launcher file: nothing to finalize.
    NoPendingUpdate,
    /// A temp launcher file exists and must be resolved before anything else.
    PendingLauncherFinalize,
}

impl PendingUpdate {
    /// Probe the temp launcher slot.
    pub fn probe(fs: &dyn FileSystem, temp_launcher: &Path) -> Self {
        if fs.exists(temp_launcher) {
            Self::PendingLauncherFinalize
        } else {
            Self::NoPendingUpdate
        }
    }
}

/// Where the current process is executing from, as far as the swap cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutingFrom {
    /// Started normally from the real launcher path (or unknown).
    RealPath,
    /// Started by an older launcher from the temp slot.
    TempSlot,
}

/// How a finalize attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReport {
    /// Nothing was pending.
    NothingPending,
    /// The temp file was a leftover and has been discarded.
    DiscardedTemp,
    /// The temp file was moved onto the real launcher path.
    PromotedTemp,
}

/// Resolves a pending launcher swap between the temp slot and the real path.
pub struct SwapEngine<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> SwapEngine<'a> {
    /// Create an engine over `fs`.
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Run one finalize attempt for `pending`.
    ///
    /// On success the real launcher exists and the temp launcher does not
    /// (except for [`FinalizeReport::NothingPending`], which touches nothing).
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Swap`] when the real launcher could not be
    /// removed (both files are left in place), when the move fails, or when
    /// the post-condition does not hold afterwards.
    pub fn finalize(
        &self,
        pending: PendingUpdate,
        temp: &Path,
        real: &Path,
        executing_from: ExecutingFrom,
    ) -> Result<FinalizeReport> {
        if pending == PendingUpdate::NoPendingUpdate {
            return Ok(FinalizeReport::NothingPending);
        }

        if executing_from == ExecutingFrom::RealPath && delete(self.fs, temp) {
            tracing::info!(temp = %temp.display(), "discarded leftover temp launcher");
            return Ok(FinalizeReport::DiscardedTemp);
        }

        if !delete(self.fs, real) {
            return Err(LauncherError::Swap(format!(
                "cannot remove real launcher {}; leaving {} in place",
                real.display(),
                temp.display()
            )));
        }

        self.fs.rename(temp, real).map_err(|e| {
            LauncherError::Swap(format!(
                "cannot move {} onto {}: {e}",
                temp.display(),
                real.display()
            ))
        })?;

        if self.fs.exists(real) && !self.fs.exists(temp) {
            tracing::info!(real = %real.display(), "promoted new launcher");
            Ok(FinalizeReport::PromotedTemp)
        } else {
            Err(LauncherError::Swap(format!(
                "after promotion real={} exists={}, temp={} exists={}",
                real.display(),
                self.fs.exists(real),
                temp.display(),
                self.fs.exists(temp)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::testing::MemoryFileSystem;
    use std::path::PathBuf;

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("/tmp/perch"), PathBuf::from("/opt/app/perch"))
    }

    #[test]
    fn probe_reflects_temp_presence() {
        let (temp, _) = paths();
        let fs = MemoryFileSystem::new();
        assert_eq!(PendingUpdate::probe(&fs, &temp), PendingUpdate::NoPendingUpdate);
        fs.insert(&temp, b"new");
        assert_eq!(
            PendingUpdate::probe(&fs, &temp),
            PendingUpdate::PendingLauncherFinalize
        );
    }

    #[test]
    fn nothing_pending_touches_nothing() {
        let (temp, real) = paths();
        let fs = MemoryFileSystem::new();
        fs.insert(&real, b"old");
        let report = SwapEngine::new(&fs)
            .finalize(PendingUpdate::NoPendingUpdate, &temp, &real, ExecutingFrom::RealPath)
            .unwrap();
        assert_eq!(report, FinalizeReport::NothingPending);
        assert_eq!(fs.contents(&real).unwrap(), b"old");
    }

    #[test]
    fn deletable_temp_is_discarded() {
        let (temp, real) = paths();
        let fs = MemoryFileSystem::new();
        fs.insert(&real, b"old");
        fs.insert(&temp, b"leftover");

        let report = SwapEngine::new(&fs)
            .finalize(
                PendingUpdate::PendingLauncherFinalize,
                &temp,
                &real,
                ExecutingFrom::RealPath,
            )
            .unwrap();

        assert_eq!(report, FinalizeReport::DiscardedTemp);
        assert!(!fs.exists(&temp));
        assert_eq!(fs.contents(&real).unwrap(), b"old");
    }

    #[test]
    fn locked_temp_is_promoted() {
        let (temp, real) = paths();
        let fs = MemoryFileSystem::new();
        fs.insert(&real, b"old");
        fs.insert(&temp, b"new");
        fs.lock(&temp);

        let report = SwapEngine::new(&fs)
            .finalize(
                PendingUpdate::PendingLauncherFinalize,
                &temp,
                &real,
                ExecutingFrom::RealPath,
            )
            .unwrap();

        assert_eq!(report, FinalizeReport::PromotedTemp);
        assert!(!fs.exists(&temp));
        assert_eq!(fs.contents(&real).unwrap(), b"new");
    }

    #[test]
    fn relaunched_instance_promotes_without_probing_temp() {
        let (temp, real) = paths();
        let fs = MemoryFileSystem::new();
        fs.insert(&real, b"old");
        fs.insert(&temp, b"new");

        let report = SwapEngine::new(&fs)
            .finalize(
                PendingUpdate::PendingLauncherFinalize,
                &temp,
                &real,
                ExecutingFrom::TempSlot,
            )
            .unwrap();

        assert_eq!(report, FinalizeReport::PromotedTemp);
        assert_eq!(fs.contents(&real).unwrap(), b"new");
        assert!(!fs.exists(&temp));
    }

    #[test]
    fn undeletable_real_leaves_both_files() {
        let (temp, real) = paths();
        let fs = MemoryFileSystem::new();
        fs.insert(&real, b"old");
        fs.insert(&temp, b"new");
        fs.lock(&temp);
        fs.lock(&real);

        let err = SwapEngine::new(&fs)
            .finalize(
                PendingUpdate::PendingLauncherFinalize,
                &temp,
                &real,
                ExecutingFrom::RealPath,
            )
            .unwrap_err();

        assert!(matches!(err, LauncherError::Swap(_)));
        assert_eq!(fs.contents(&real).unwrap(), b"old");
        assert_eq!(fs.contents(&temp).unwrap(), b"new");
    }

    #[test]
    fn finalize_twice_is_idempotent() {
        let (temp, real) = paths();
        for temp_present in [false, true] {
            let fs = MemoryFileSystem::new();
            fs.insert(&real, b"old");
            if temp_present {
                fs.insert(&temp, b"leftover");
            }
            let engine = SwapEngine::new(&fs);
            for _ in 0..2 {
                let pending = PendingUpdate::probe(&fs, &temp);
                engine
                    .finalize(pending, &temp, &real, ExecutingFrom::RealPath)
                    .unwrap();
            }
            assert!(fs.exists(&real));
            assert!(!fs.exists(&temp));
            assert_eq!(fs.file_count(), 1);
        }
    }

    #[test]
    fn works_on_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("slot").join("perch");
        let real = dir.path().join("perch");
        std::fs::create_dir_all(temp.parent().unwrap()).unwrap();
        std::fs::write(&real, "old").unwrap();
        std::fs::write(&temp, "new").unwrap();

        let fs = crate::update::fs::OsFileSystem;
        let report = SwapEngine::new(&fs)
            .finalize(
                PendingUpdate::probe(&fs, &temp),
                &temp,
                &real,
                ExecutingFrom::TempSlot,
            )
            .unwrap();

        assert_eq!(report, FinalizeReport::PromotedTemp);
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "new");
        assert!(!temp.exists());
    }
}
