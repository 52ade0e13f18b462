//! Self-update core for the launcher and the application it manages.
//!
//! The [`Orchestrator`] decides between downloading, swapping and launching;
//! the [`swap`] module holds the protocol that lets a running launcher
//! replace its own binary by relaunching from a temp slot. Version lookup,
//! staleness checks, transfers and process starts are collaborators behind
//! the traits in [`traits`].

pub mod fs;
pub mod installation;
pub mod orchestrator;
pub mod swap;
pub mod system;
pub mod traits;
pub mod version;

pub use fs::{ArtifactSink, FileSystem, OsFileSystem};
pub use installation::{Installation, LAUNCHER_PATH_FLAG, RelaunchArgs, Target};
pub use orchestrator::{Orchestrator, OrchestratorConfig, UpdateOutcome};
pub use swap::{ExecutingFrom, FinalizeReport, PendingUpdate, SwapEngine};
pub use system::{CommandVersionOracle, OsProcessLauncher};
pub use traits::{ArtifactDownloader, ProcessLauncher, StalenessChecker, VersionOracle};
pub use version::{Version, parse_version_output};
