//! Perch: a self-updating launcher for a managed application.
//!
//! On every start the launcher:
//! 1. Finalizes a self-update left pending by the previous run
//! 2. Replaces itself if its release feed has a newer build (relaunching
//!    from a temp copy, since a running binary cannot overwrite itself)
//! 3. Otherwise brings the managed application current
//! 4. Starts the application with the original arguments
//!
//! The core lives in [`update`]; [`remote`] supplies an HTTP release feed
//! and [`config`] the on-disk settings used by the `perch` binary.

pub mod config;
pub mod error;
pub mod remote;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod update;

pub use config::LauncherConfig;
pub use error::{LauncherError, Result};
pub use remote::HttpFeed;
pub use update::{Orchestrator, OrchestratorConfig, Target, UpdateOutcome, Version};
