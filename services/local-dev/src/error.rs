//! Error types for the local development orchestrator

/// Errors that can occur while bootstrapping or supervising the local stack
#[derive(Debug, thiserror::Error)]
pub enum LocalDevError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to start {app}: {reason}")]
    SpawnFailed { app: String, reason: String },

    #[error("Failed to install dependencies in {app}: {reason}")]
    InstallFailed { app: String, reason: String },

    #[error("{app} exited with status {code}")]
    ServiceCrashed { app: String, code: i32 },

    #[error("Shutdown requested")]
    Cancelled,
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, LocalDevError>;
