//! Local development orchestrator
//!
//! Installs missing dependencies for the placer dashboard and service, then
//! runs both as supervised child processes until they exit.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod io;
pub mod orchestrator;

pub use bootstrap::{BootstrapStatus, DependencyBootstrapper};
pub use config::{load_config, AppConfig, CommandSpec, Config};
pub use error::{LocalDevError, Result};
pub use orchestrator::ProcessOrchestrator;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::io::{TokioMarkerProbe, TokioProcessSpawner};

/// Run the orchestrator against the real filesystem and process table
///
/// Returns when every service has exited, a service has crashed, or
/// `cancel` is triggered.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    tracing::debug!("Managing {} apps", config.apps.len());

    let orchestrator = ProcessOrchestrator::new(
        Arc::new(TokioMarkerProbe::new()),
        Arc::new(TokioProcessSpawner::new()),
        cancel,
    )
    .with_stop_timeout(Duration::from_secs(config.stop_timeout_seconds));
    orchestrator.run(&config.apps).await
}
