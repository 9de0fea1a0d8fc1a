//! Error types for the dashboard server

/// Errors that can occur in the dashboard server
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server rendering failed: {0}")]
    Ssr(String),
}

/// Result type alias for dashboard server operations
pub type Result<T> = std::result::Result<T, DashboardError>;
