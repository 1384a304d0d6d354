//! Error types for the collector agent

use thiserror::Error;

/// Main error type for the collector agent
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("transport error for {host}: {reason}")]
    TransportError { host: String, reason: String },

    #[error("too many connect retries for {0}")]
    TooManyRetries(String),

    #[error("command execution failed on {host}: {reason}")]
    CommandExecutionError { host: String, reason: String },

    #[error("utilization calculation failed: {0}")]
    CalculationError(String),

    #[error("unhandled collection failure on {host}: {reason}")]
    UnhandledCollectionError { host: String, reason: String },

    #[error("no nodes configured")]
    NoNodesConfigured,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("shutdown error: {0}")]
    ShutdownError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CollectorError {
    fn from(err: anyhow::Error) -> Self {
        CollectorError::Internal(err.to_string())
    }
}
