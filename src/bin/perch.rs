//! Launcher binary: update the launcher and the application, then start one.
//!
//! All arguments are forwarded to the started process, except
//! `-launcher-path-before-update <path>` which is reserved for handing the
//! real launcher path to a relaunched copy. A lone `--version` prints the
//! launcher version so the version oracle can query this binary too.

use perch::config::{LauncherConfig, LoggingConfig};
use perch::update::RelaunchArgs;
use perch::{HttpFeed, Orchestrator, OrchestratorConfig};
use std::ffi::OsString;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    if args.len() == 1 && args[0] == "--version" {
        println!("perch {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    // A relaunched copy runs from the temp slot; settings live next to the
    // real launcher.
    let current_exe = std::env::current_exe()?;
    let relaunch = RelaunchArgs::parse(args.iter().cloned());
    let real_launcher = relaunch
        .launcher_path_before_update()
        .unwrap_or(&current_exe)
        .to_path_buf();

    let config_path = LauncherConfig::locate(&real_launcher);
    let config = LauncherConfig::load_or_default(&config_path)?;
    let _log_guard = init_tracing(&config.logging);
    info!(config = %config_path.display(), "perch v{} starting", env!("CARGO_PKG_VERSION"));

    let launcher_path = config.launcher.path.clone().unwrap_or(real_launcher);
    let launcher_dir = launcher_path.parent().unwrap_or(Path::new("."));
    let application_path = config.application_path(launcher_dir)?;

    let feed = Arc::new(HttpFeed::from_config(&config.feed)?);
    let mut setup = OrchestratorConfig::new(application_path)
        .with_launcher_path(launcher_path)
        .with_downloader(feed.clone())
        .with_checker(feed);
    if let Some(temp_dir) = config.launcher.temp_dir.clone() {
        setup = setup.with_temp_dir(temp_dir);
    }

    let orchestrator = Orchestrator::new(setup, args)?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, cancelling update...");
            cancel_clone.cancel();
        }
    });

    let outcome = orchestrator.run(&cancel).await;
    info!(%outcome, exit_code = outcome.exit_code(), "perch finished");
    Ok(ExitCode::from(outcome.exit_code()))
}

/// Log to stderr and, when a directory is configured, to a daily rolling file.
///
/// The returned guard flushes the file writer on drop and must outlive `main`'s work.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "perch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .init();

    guard
}
