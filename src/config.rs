//! On-disk launcher configuration (`perch.toml`).

use crate::error::{LauncherError, Result};
use crate::update::Target;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PERCH_CONFIG";

/// File name looked up next to the launcher executable.
pub const SIBLING_CONFIG_NAME: &str = "perch.toml";

/// Top-level launcher configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// The managed application.
    pub application: ApplicationConfig,
    /// Launcher location and temp slot overrides.
    pub launcher: LauncherSection,
    /// Release feed endpoints.
    pub feed: FeedConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Managed application settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application binary. Relative paths resolve against the launcher's
    /// directory.
    pub path: Option<PathBuf>,
}

/// Launcher settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LauncherSection {
    /// Launcher binary (None = the running executable).
    pub path: Option<PathBuf>,
    /// Directory for the temp slots (None = the OS temp dir).
    pub temp_dir: Option<PathBuf>,
}

/// Release feed settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Launcher channel.
    pub launcher: FeedChannel,
    /// Application channel.
    pub application: FeedChannel,
    /// Connect timeout for feed requests, in seconds.
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            launcher: FeedChannel::default(),
            application: FeedChannel::default(),
            timeout_secs: 15,
        }
    }
}

/// One release channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedChannel {
    /// URL of the JSON release manifest.
    pub manifest_url: Option<String>,
}

impl FeedChannel {
    /// Parsed manifest URL for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] if the URL is missing or invalid.
    pub fn manifest_url(&self, target: Target) -> Result<Url> {
        let raw = self.manifest_url.as_deref().ok_or_else(|| {
            LauncherError::Config(format!("feed.{target}.manifest_url is not set"))
        })?;
        Url::parse(raw)
            .map_err(|e| LauncherError::Config(format!("feed.{target}.manifest_url {raw:?}: {e}")))
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for a daily rolling log file (None = stderr only).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "perch=info".to_owned(),
            directory: None,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| LauncherError::Config(format!("{}: {e}", path.display())))
    }

    /// Load `path` if it exists, otherwise return the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Returns the per-user config path: `<config dir>/perch/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("perch")
            .join("config.toml")
    }

    /// Pick the config file for a launcher living at `launcher_path`:
    /// `$PERCH_CONFIG`, else `perch.toml` beside the launcher if present,
    /// else [`LauncherConfig::default_config_path`].
    pub fn locate(launcher_path: &Path) -> PathBuf {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(explicit);
        }
        if let Some(dir) = launcher_path.parent() {
            let sibling = dir.join(SIBLING_CONFIG_NAME);
            if sibling.is_file() {
                return sibling;
            }
        }
        Self::default_config_path()
    }

    /// The application path, resolved against `launcher_dir` when relative.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] if `application.path` is not set.
    pub fn application_path(&self, launcher_dir: &Path) -> Result<PathBuf> {
        let path = self.application.path.as_deref().ok_or_else(|| {
            LauncherError::Config("application.path is not set".to_owned())
        })?;
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            launcher_dir.join(path)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults() {
        let config = LauncherConfig::default();
        assert!(config.application.path.is_none());
        assert!(config.launcher.temp_dir.is_none());
        assert_eq!(config.feed.timeout_secs, 15);
        assert_eq!(config.logging.filter, "perch=info");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: LauncherConfig = toml::from_str(
            r#"
[application]
path = "bin/editor"

[feed.launcher]
manifest_url = "https://updates.example.com/perch.json"
"#,
        )
        .unwrap();
        assert_eq!(config.application.path.as_deref(), Some(Path::new("bin/editor")));
        assert!(config.feed.launcher.manifest_url.is_some());
        assert!(config.feed.application.manifest_url.is_none());
        assert_eq!(config.feed.timeout_secs, 15);
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn relative_application_path_resolves_against_launcher_dir() {
        let mut config = LauncherConfig::default();
        config.application.path = Some(PathBuf::from("bin/editor"));
        assert_eq!(
            config.application_path(Path::new("/opt/app")).unwrap(),
            PathBuf::from("/opt/app/bin/editor")
        );

        config.application.path = Some(PathBuf::from("/usr/bin/editor"));
        assert_eq!(
            config.application_path(Path::new("/opt/app")).unwrap(),
            PathBuf::from("/usr/bin/editor")
        );
    }

    #[test]
    fn missing_application_path_is_config_error() {
        let err = LauncherConfig::default()
            .application_path(Path::new("/opt/app"))
            .unwrap_err();
        assert!(matches!(err, LauncherError::Config(_)));
    }

    #[test]
    fn manifest_url_validation() {
        let channel = FeedChannel {
            manifest_url: Some("not a url".to_owned()),
        };
        assert!(channel.manifest_url(Target::Launcher).is_err());
        assert!(FeedChannel::default().manifest_url(Target::Application).is_err());

        let channel = FeedChannel {
            manifest_url: Some("https://updates.example.com/app.json".to_owned()),
        };
        assert_eq!(
            channel.manifest_url(Target::Application).unwrap().host_str(),
            Some("updates.example.com")
        );
    }

    #[test]
    fn from_file_reads_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perch.toml");
        std::fs::write(
            &path,
            r#"
[application]
path = "editor"

[launcher]
temp_dir = "/var/tmp/perch"

[feed]
timeout_secs = 4

[feed.application]
manifest_url = "https://updates.example.com/app.json"

[logging]
filter = "perch=debug"
directory = "/var/log/perch"
"#,
        )
        .unwrap();

        let config = LauncherConfig::load_or_default(&path).unwrap();
        assert_eq!(config.application.path.as_deref(), Some(Path::new("editor")));
        assert_eq!(config.launcher.temp_dir.as_deref(), Some(Path::new("/var/tmp/perch")));
        assert!(config.launcher.path.is_none());
        assert_eq!(config.feed.timeout_secs, 4);
        assert!(config.feed.application.manifest_url.is_some());
        assert_eq!(config.logging.filter, "perch=debug");
        assert_eq!(config.logging.directory.as_deref(), Some(Path::new("/var/log/perch")));
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(config.application.path.is_none());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(LauncherConfig::from_file(&path).is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = LauncherConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("perch"));
    }
}
