//! Error types for the perch launcher.

/// Top-level error type for launcher construction and collaborator calls.
///
/// Only [`LauncherError::Config`] escapes [`crate::Orchestrator::new`]; every
/// other variant is folded into an [`crate::UpdateOutcome`] by the run loop.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    /// Missing launcher binary, missing collaborator, or unreadable config file.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Version lookup or version string parsing failed.
    #[error("version error: {0}")]
    Version(String),

    /// Artifact transfer failed or produced an unusable file.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Temp/real file contention could not be resolved.
    #[error("swap error: {0}")]
    Swap(String),

    /// A process could not be started.
    #[error("launch error: {0}")]
    Launch(String),

    /// Release feed request or manifest decoding failed.
    #[error("http error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for LauncherError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LauncherError>;
