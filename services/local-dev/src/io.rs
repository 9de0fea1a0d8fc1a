//! Process and filesystem abstractions for the orchestrator
//!
//! These traits let the bootstrapper and the orchestrator run against
//! mockall mocks or in-memory fakes in tests. The default implementations
//! spawn tokio processes and query the real filesystem.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::CommandSpec;
use crate::error::{LocalDevError, Result};

// ============================================================================
// ProcessHandle trait and implementations
// ============================================================================

/// Trait for interacting with a spawned process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessHandle: Send {
    /// Check if the process has exited without waiting
    ///
    /// Returns `Ok(Some(exit_code))` if the process has exited,
    /// `Ok(None)` if it's still running, or an error.
    async fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Ask the process to shut down (SIGTERM on unix)
    ///
    /// Does not wait for the process to exit.
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process
    async fn kill(&mut self) -> Result<()>;

    /// Wait for the process to exit and return its exit code
    ///
    /// A process terminated by a signal reports `-1`.
    async fn wait(&mut self) -> Result<i32>;

    /// Get the process ID if available
    fn id(&self) -> Option<u32>;
}

/// Tokio process handle implementation
pub struct TokioProcessHandle {
    child: Child,
}

impl TokioProcessHandle {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    async fn try_wait(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => Ok(None),
            Err(e) => Err(LocalDevError::Io(e)),
        }
    }

    #[cfg(unix)]
    async fn terminate(&mut self) -> Result<()> {
        // No pid once the child has been reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            return Err(LocalDevError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn terminate(&mut self) -> Result<()> {
        self.child.start_kill().map_err(LocalDevError::Io)
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(LocalDevError::Io)
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.map_err(LocalDevError::Io)?;
        Ok(status.code().unwrap_or(-1))
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

// ============================================================================
// ProcessSpawner trait and implementations
// ============================================================================

/// Trait for spawning processes with inherited standard I/O
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `command` with `cwd` as its working directory
    async fn spawn(&self, command: &CommandSpec, cwd: &Path) -> Result<Box<dyn ProcessHandle>>;
}

/// Tokio implementation of ProcessSpawner
#[derive(Default, Clone)]
pub struct TokioProcessSpawner;

impl TokioProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, command: &CommandSpec, cwd: &Path) -> Result<Box<dyn ProcessHandle>> {
        debug!("Spawning `{}` in {}", command, cwd.display());

        let child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        debug!("Process started with PID: {:?}", child.id());

        Ok(Box::new(TokioProcessHandle::new(child)))
    }
}

// ============================================================================
// MarkerProbe trait and implementations
// ============================================================================

/// Trait for checking whether a bootstrap marker exists
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarkerProbe: Send + Sync {
    async fn exists(&self, path: &Path) -> std::io::Result<bool>;
}

/// Filesystem-backed marker probe
#[derive(Default, Clone)]
pub struct TokioMarkerProbe;

impl TokioMarkerProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MarkerProbe for TokioMarkerProbe {
    async fn exists(&self, path: &Path) -> std::io::Result<bool> {
        tokio::fs::try_exists(path).await
    }
}
