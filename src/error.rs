//! Error types for the vigil orchestrator

use thiserror::Error;

/// Main error type for vigil operations
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Cron expression error: {0}")]
    Cron(#[from] cron::error::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Job {0} not found")]
    JobNotFound(i64),
}

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
