//! Orchestrator: bootstraps every app, then runs and supervises their services

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{BootstrapStatus, DependencyBootstrapper};
use crate::config::AppConfig;
use crate::error::{LocalDevError, Result};
use crate::io::{MarkerProbe, ProcessHandle, ProcessSpawner};

/// Default time a stopping service gets between SIGTERM and SIGKILL
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a supervised service ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceExit {
    Exited(i32),
    Stopped,
}

/// Runs the bootstrap phase and then the long-running services
///
/// Services are started only after every bootstrap step has resolved. While
/// running, a service that exits non-zero cancels the shared token, which
/// stops its siblings. A clean exit leaves the siblings running. Stopping a
/// service asks it to terminate and kills it only if it outlives the stop
/// timeout.
pub struct ProcessOrchestrator {
    bootstrapper: DependencyBootstrapper,
    spawner: Arc<dyn ProcessSpawner>,
    cancel: CancellationToken,
    stop_timeout: Duration,
}

impl ProcessOrchestrator {
    pub fn new(
        probe: Arc<dyn MarkerProbe>,
        spawner: Arc<dyn ProcessSpawner>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bootstrapper: DependencyBootstrapper::new(probe, Arc::clone(&spawner)),
            spawner,
            cancel,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Set how long a stopping service may take before it is killed
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Bootstrap all apps, start their services and wait for them to exit
    pub async fn run(&self, apps: &[AppConfig]) -> Result<()> {
        self.bootstrap_all(apps).await?;
        let services = self.spawn_services(apps).await?;
        self.supervise(services).await
    }

    async fn bootstrap_all(&self, apps: &[AppConfig]) -> Result<()> {
        let bootstraps = join_all(apps.iter().map(|app| self.bootstrapper.bootstrap(app)));

        // Dropping in-flight installs kills them (kill_on_drop).
        let statuses = tokio::select! {
            statuses = bootstraps => statuses,
            _ = self.cancel.cancelled() => {
                info!("Shutdown requested during dependency installation");
                return Err(LocalDevError::Cancelled);
            }
        };

        let mut first_failure = None;
        for (app, status) in apps.iter().zip(statuses) {
            match status {
                BootstrapStatus::Skipped => debug!("{}: dependencies already installed", app.name),
                BootstrapStatus::Installed => info!("{}: dependencies installed", app.name),
                BootstrapStatus::Failed { reason } => {
                    error!("Failed to install dependencies in {}: {}", app.name, reason);
                    first_failure.get_or_insert(LocalDevError::InstallFailed {
                        app: app.name.clone(),
                        reason,
                    });
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn spawn_services<'a>(
        &self,
        apps: &'a [AppConfig],
    ) -> Result<Vec<(&'a AppConfig, Box<dyn ProcessHandle>)>> {
        if self.cancel.is_cancelled() {
            return Err(LocalDevError::Cancelled);
        }

        let spawned = join_all(apps.iter().map(|app| async move {
            (app, self.spawner.spawn(&app.run, &app.dir).await)
        }))
        .await;

        let mut services = Vec::with_capacity(spawned.len());
        let mut failure = None;
        for (app, result) in spawned {
            match result {
                Ok(handle) => {
                    info!("Started {} (PID {:?}): `{}`", app.name, handle.id(), app.run);
                    services.push((app, handle));
                }
                Err(e) => {
                    error!("Failed to start {}: {}", app.name, e);
                    failure.get_or_insert(LocalDevError::SpawnFailed {
                        app: app.name.clone(),
                        reason: format!("`{}`: {}", app.run, e),
                    });
                }
            }
        }

        if let Some(err) = failure {
            for (app, handle) in services {
                stop_service(app, handle, self.stop_timeout).await;
            }
            return Err(err);
        }

        Ok(services)
    }

    async fn supervise(&self, services: Vec<(&AppConfig, Box<dyn ProcessHandle>)>) -> Result<()> {
        let names: Vec<String> = services.iter().map(|(app, _)| app.name.clone()).collect();
        let exits = join_all(
            services
                .into_iter()
                .map(|(app, handle)| {
                    supervise_service(app, handle, self.cancel.clone(), self.stop_timeout)
                }),
        )
        .await;

        let mut stopped = false;
        for (name, exit) in names.into_iter().zip(exits) {
            match exit {
                ServiceExit::Exited(0) => {}
                ServiceExit::Exited(code) => {
                    return Err(LocalDevError::ServiceCrashed { app: name, code });
                }
                ServiceExit::Stopped => stopped = true,
            }
        }

        if stopped {
            Err(LocalDevError::Cancelled)
        } else {
            Ok(())
        }
    }
}

async fn supervise_service(
    app: &AppConfig,
    mut handle: Box<dyn ProcessHandle>,
    cancel: CancellationToken,
    stop_timeout: Duration,
) -> ServiceExit {
    let result = tokio::select! {
        result = handle.wait() => result,
        _ = cancel.cancelled() => {
            stop_service(app, handle, stop_timeout).await;
            return ServiceExit::Stopped;
        }
    };

    // Exits after shutdown began are part of the shutdown
    if cancel.is_cancelled() {
        debug!("{} exited during shutdown: {:?}", app.name, result);
        return ServiceExit::Stopped;
    }

    match result {
        Ok(0) => {
            info!("{} exited", app.name);
            ServiceExit::Exited(0)
        }
        Ok(code) => {
            error!("{} exited with status {}, stopping remaining services", app.name, code);
            cancel.cancel();
            ServiceExit::Exited(code)
        }
        Err(e) => {
            error!("Lost track of {}: {}, stopping remaining services", app.name, e);
            cancel.cancel();
            ServiceExit::Exited(-1)
        }
    }
}

/// Terminate a service, falling back to a kill after `stop_timeout`
async fn stop_service(app: &AppConfig, mut handle: Box<dyn ProcessHandle>, stop_timeout: Duration) {
    info!("Stopping {}", app.name);
    match handle.terminate().await {
        Ok(()) => {
            if wait_for_exit(app, handle.as_mut(), stop_timeout).await {
                return;
            }
            warn!(
                "{} did not exit within {} seconds, killing it",
                app.name,
                stop_timeout.as_secs_f32()
            );
        }
        Err(e) => debug!("Terminating {} failed: {}, will force kill", app.name, e),
    }

    if let Err(e) = handle.kill().await {
        warn!("Error killing {}: {}", app.name, e);
    }
    // Reap the process
    let _ = handle.wait().await;
}

/// Poll until the process has exited; false on timeout
async fn wait_for_exit(app: &AppConfig, handle: &mut dyn ProcessHandle, timeout: Duration) -> bool {
    let start = Instant::now();

    loop {
        match handle.try_wait().await {
            Ok(Some(code)) => {
                debug!("{} stopped with status {}", app.name, code);
                return true;
            }
            Ok(None) => {}
            Err(e) => debug!("Error checking status of {}: {}", app.name, e),
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
