//! local-dev CLI
//!
//! Starts the placer service and the placer dashboard for local development.
//! Run from the repository root with no arguments.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use local_dev::{load_config, Config, LocalDevError};
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Conventional status for a process stopped by SIGINT (128 + 2)
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "local-dev")]
#[command(about = "Install dependencies and run the placer service and dashboard")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = clap::value_parser!(Level))]
    log_level: Level,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, log_level={:?}",
        args.config,
        args.log_level
    );

    let config = match &args.config {
        Some(config_path) => {
            tracing::debug!("Loading configuration from {:?}", config_path);
            match load_config(config_path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!("{}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        None => Config::default(),
    };

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            cancel_for_signal.cancel();
        }
    });

    match local_dev::run(config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(LocalDevError::Cancelled) => {
            tracing::info!("All services stopped");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        // Already logged by the orchestrator with the failing step
        Err(
            LocalDevError::InstallFailed { .. }
            | LocalDevError::SpawnFailed { .. }
            | LocalDevError::ServiceCrashed { .. },
        ) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
