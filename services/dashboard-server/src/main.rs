//! dashboard-server CLI
//!
//! Serves the built placer dashboard in production.

use std::path::PathBuf;

use clap::Parser;
use dashboard_server::{load_config, Config};
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[derive(Parser)]
#[command(name = "dashboard-server")]
#[command(about = "Serve the placer dashboard: static assets with server-rendering fallback")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, port={:?}, log_level={:?}",
        args.config,
        args.port,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            cancel_for_signal.cancel();
        }
    });

    dashboard_server::start_server(config, cancel).await?;

    Ok(())
}
