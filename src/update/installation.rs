//! The two-binary installation and the argument vector handed between
//! launcher generations.

use crate::error::{LauncherError, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Reserved argument that carries the real launcher path into a launcher
/// started from the temp slot.
pub const LAUNCHER_PATH_FLAG: &str = "-launcher-path-before-update";

/// Which of the two managed binaries an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The self-updating launcher executable.
    Launcher,
    /// The application the launcher keeps current and starts.
    Application,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Launcher => write!(f, "launcher"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Real and temp-slot locations of both binaries for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    launcher_path: PathBuf,
    launcher_file_name: OsString,
    application_path: PathBuf,
    application_file_name: OsString,
    temp_dir: PathBuf,
}

impl Installation {
    /// Describe an installation. Existence of the paths is checked by the
    /// orchestrator, which owns the filesystem handle.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] if either path has no file name.
    pub fn new(launcher_path: PathBuf, application_path: PathBuf, temp_dir: PathBuf) -> Result<Self> {
        let launcher_file_name = file_name_of(&launcher_path, Target::Launcher)?;
        let application_file_name = file_name_of(&application_path, Target::Application)?;
        Ok(Self {
            launcher_path,
            launcher_file_name,
            application_path,
            application_file_name,
            temp_dir,
        })
    }

    /// Real location of the launcher binary.
    pub fn launcher_path(&self) -> &Path {
        &self.launcher_path
    }

    /// Real location of the application binary (may not exist yet).
    pub fn application_path(&self) -> &Path {
        &self.application_path
    }

    /// Directory holding the temp slots.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Real path of `target`.
    pub fn real_path(&self, target: Target) -> &Path {
        match target {
            Target::Launcher => &self.launcher_path,
            Target::Application => &self.application_path,
        }
    }

    /// Temp slot of `target`: `temp_dir/<file name of the real binary>`.
    pub fn temp_path(&self, target: Target) -> PathBuf {
        match target {
            Target::Launcher => self.temp_dir.join(&self.launcher_file_name),
            Target::Application => self.temp_dir.join(&self.application_file_name),
        }
    }

    /// Temp slot of the launcher. Its presence marks a pending self-update.
    pub fn temp_launcher_path(&self) -> PathBuf {
        self.temp_path(Target::Launcher)
    }

    /// Temp slot of the application.
    pub fn temp_application_path(&self) -> PathBuf {
        self.temp_path(Target::Application)
    }

    /// Check that the two real paths and the two temp slots are four distinct
    /// files. Paths are compared after resolving their parent directories, so
    /// `temp_dir = "bin/.."` next to the launcher is caught too.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] naming the first pair that resolves
    /// to the same file.
    pub fn ensure_distinct_slots(&self) -> Result<()> {
        let slots = [
            ("launcher", resolved(&self.launcher_path)),
            ("application", resolved(&self.application_path)),
            ("launcher temp slot", resolved(&self.temp_launcher_path())),
            ("application temp slot", resolved(&self.temp_application_path())),
        ];
        for (i, (name_a, a)) in slots.iter().enumerate() {
            for (name_b, b) in &slots[i + 1..] {
                if a == b {
                    return Err(LauncherError::Config(format!(
                        "{name_a} and {name_b} are both {}; set a temp dir outside the install dir \
                         and give the binaries different file names",
                        a.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `path` with its parent directory canonicalized. The file itself need not
/// exist; an unresolvable parent leaves the path as given.
fn resolved(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            std::fs::canonicalize(parent)
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

fn file_name_of(path: &Path, target: Target) -> Result<OsString> {
    path.file_name().map(OsStr::to_os_string).ok_or_else(|| {
        LauncherError::Config(format!("{target} path {} has no file name", path.display()))
    })
}

/// The process arguments with the reserved relaunch pair split out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaunchArgs {
    passthrough: Vec<OsString>,
    launcher_path_before_update: Option<PathBuf>,
}

impl RelaunchArgs {
    /// Split `-launcher-path-before-update <path>` out of `args`.
    ///
    /// The first complete pair wins; a trailing flag without a value is left
    /// in the pass-through arguments untouched.
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut passthrough = Vec::new();
        let mut launcher_path_before_update = None;
        let mut iter = args.into_iter().map(Into::into);

        while let Some(arg) = iter.next() {
            if launcher_path_before_update.is_none()
                && arg == LAUNCHER_PATH_FLAG
                && let Some(value) = iter.next()
            {
                launcher_path_before_update = Some(PathBuf::from(value));
                continue;
            }
            passthrough.push(arg);
        }

        Self {
            passthrough,
            launcher_path_before_update,
        }
    }

    /// Arguments forwarded unchanged to the application or a new launcher.
    pub fn passthrough(&self) -> &[OsString] {
        &self.passthrough
    }

    /// Real launcher path handed over by the previous generation, if any.
    pub fn launcher_path_before_update(&self) -> Option<&Path> {
        self.launcher_path_before_update.as_deref()
    }

    /// `true` when this process was started from the temp slot by an older
    /// launcher.
    pub fn is_relaunch(&self) -> bool {
        self.launcher_path_before_update.is_some()
    }

    /// Arguments for starting the temp-slot launcher: the pass-through
    /// arguments followed by the reserved flag and `real_launcher_path`.
    pub fn for_new_launcher(&self, real_launcher_path: &Path) -> Vec<OsString> {
        let mut args = self.passthrough.clone();
        args.push(OsString::from(LAUNCHER_PATH_FLAG));
        args.push(real_launcher_path.as_os_str().to_os_string());
        args
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn installation() -> Installation {
        Installation::new(
            PathBuf::from("/opt/app/perch"),
            PathBuf::from("/opt/app/bin/editor"),
            PathBuf::from("/tmp/slots"),
        )
        .unwrap()
    }

    #[test]
    fn temp_slots_use_real_file_names() {
        let inst = installation();
        assert_eq!(inst.temp_launcher_path(), PathBuf::from("/tmp/slots/perch"));
        assert_eq!(
            inst.temp_application_path(),
            PathBuf::from("/tmp/slots/editor")
        );
        assert_eq!(inst.real_path(Target::Application), Path::new("/opt/app/bin/editor"));
    }

    #[test]
    fn path_without_file_name_is_config_error() {
        let err = Installation::new(
            PathBuf::from("/"),
            PathBuf::from("/opt/app/editor"),
            PathBuf::from("/tmp"),
        )
        .unwrap_err();
        assert!(matches!(err, LauncherError::Config(_)));
    }

    #[test]
    fn separate_temp_dir_passes_slot_check() {
        installation().ensure_distinct_slots().unwrap();
    }

    #[test]
    fn temp_dir_equal_to_install_dir_is_rejected() {
        let inst = Installation::new(
            PathBuf::from("/opt/app/perch"),
            PathBuf::from("/opt/app/editor"),
            PathBuf::from("/opt/app"),
        )
        .unwrap();
        let err = inst.ensure_distinct_slots().unwrap_err();
        assert!(matches!(err, LauncherError::Config(_)));
        assert!(err.to_string().contains("launcher temp slot"), "{err}");
    }

    #[test]
    fn temp_dir_equal_to_application_dir_is_rejected() {
        let inst = Installation::new(
            PathBuf::from("/opt/app/perch"),
            PathBuf::from("/opt/app/bin/editor"),
            PathBuf::from("/opt/app/bin"),
        )
        .unwrap();
        let err = inst.ensure_distinct_slots().unwrap_err();
        assert!(err.to_string().contains("application temp slot"), "{err}");
    }

    #[test]
    fn same_file_names_collide_in_temp_dir() {
        let inst = Installation::new(
            PathBuf::from("/opt/launcher/run"),
            PathBuf::from("/opt/app/run"),
            PathBuf::from("/tmp/slots"),
        )
        .unwrap();
        let err = inst.ensure_distinct_slots().unwrap_err();
        assert!(matches!(err, LauncherError::Config(_)));
    }

    #[test]
    fn install_dir_reached_through_dot_dot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install");
        std::fs::create_dir_all(install.join("bin")).unwrap();
        let inst = Installation::new(
            install.join("perch"),
            install.join("bin").join("editor"),
            install.join("bin").join(".."),
        )
        .unwrap();
        assert!(inst.ensure_distinct_slots().is_err());
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::Launcher.to_string(), "launcher");
        assert_eq!(Target::Application.to_string(), "application");
    }

    #[test]
    fn parse_without_flag_passes_everything_through() {
        let args = RelaunchArgs::parse(["--profile", "dev", "file.txt"]);
        assert!(!args.is_relaunch());
        assert_eq!(args.passthrough(), &["--profile", "dev", "file.txt"]);
    }

    #[test]
    fn parse_strips_reserved_pair_anywhere() {
        let args = RelaunchArgs::parse(["a", LAUNCHER_PATH_FLAG, "/opt/app/perch", "b"]);
        assert!(args.is_relaunch());
        assert_eq!(args.launcher_path_before_update(), Some(Path::new("/opt/app/perch")));
        assert_eq!(args.passthrough(), &["a", "b"]);
    }

    #[test]
    fn dangling_flag_is_passed_through() {
        let args = RelaunchArgs::parse(["a", LAUNCHER_PATH_FLAG]);
        assert!(!args.is_relaunch());
        assert_eq!(args.passthrough(), &["a", LAUNCHER_PATH_FLAG]);
    }

    #[test]
    fn new_launcher_args_append_flag_and_real_path() {
        let args = RelaunchArgs::parse(["--verbose"]);
        let relaunch = args.for_new_launcher(Path::new("/opt/app/perch"));
        assert_eq!(relaunch, vec![
            OsString::from("--verbose"),
            OsString::from(LAUNCHER_PATH_FLAG),
            OsString::from("/opt/app/perch"),
        ]);

        let reparsed = RelaunchArgs::parse(relaunch);
        assert_eq!(reparsed.passthrough(), args.passthrough());
        assert_eq!(reparsed.launcher_path_before_update(), Some(Path::new("/opt/app/perch")));
    }
}
