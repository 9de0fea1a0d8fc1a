//! Dependency installation for sub-applications
//!
//! An app counts as installed when its marker path exists. Missing markers
//! trigger the app's install command; nothing else is inspected.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{LocalDevError, Result};
use crate::io::{MarkerProbe, ProcessHandle, ProcessSpawner};

/// Resolved outcome of bootstrapping a single app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    /// Marker present, no install process was spawned
    Skipped,
    /// Install process ran and exited with 0
    Installed,
    /// Install could not be spawned or exited non-zero
    Failed { reason: String },
}

impl BootstrapStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, BootstrapStatus::Failed { .. })
    }
}

/// Installs dependencies for apps whose marker is missing
pub struct DependencyBootstrapper {
    probe: Arc<dyn MarkerProbe>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl DependencyBootstrapper {
    pub fn new(probe: Arc<dyn MarkerProbe>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self { probe, spawner }
    }

    /// Spawn the install command if the app's marker is absent
    ///
    /// Returns `None` when the marker exists. A marker whose existence cannot
    /// be determined is treated as absent.
    pub async fn ensure_installed(&self, app: &AppConfig) -> Result<Option<Box<dyn ProcessHandle>>> {
        let marker = app.marker_path();
        let present = match self.probe.exists(&marker).await {
            Ok(present) => present,
            Err(e) => {
                warn!("Could not check {}: {}", marker.display(), e);
                false
            }
        };

        if present {
            debug!("{}: found {}, skipping install", app.name, marker.display());
            return Ok(None);
        }

        info!(
            "{} not found, installing dependencies for {}",
            marker.display(),
            app.name
        );
        let handle = self
            .spawner
            .spawn(&app.install, &app.dir)
            .await
            .map_err(|e| LocalDevError::SpawnFailed {
                app: app.name.clone(),
                reason: format!("`{}`: {}", app.install, e),
            })?;
        Ok(Some(handle))
    }

    /// Run `ensure_installed` and wait for any install process to finish
    pub async fn bootstrap(&self, app: &AppConfig) -> BootstrapStatus {
        let handle = match self.ensure_installed(app).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return BootstrapStatus::Skipped,
            Err(e) => {
                return BootstrapStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        wait_for_install(app, handle).await
    }
}

async fn wait_for_install(app: &AppConfig, mut handle: Box<dyn ProcessHandle>) -> BootstrapStatus {
    match handle.wait().await {
        Ok(0) => {
            debug!("{}: install finished", app.name);
            BootstrapStatus::Installed
        }
        Ok(code) => BootstrapStatus::Failed {
            reason: format!("`{}` exited with status {}", app.install, code),
        },
        Err(e) => BootstrapStatus::Failed {
            reason: format!("waiting for `{}` failed: {}", app.install, e),
        },
    }
}
