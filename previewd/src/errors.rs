//! Error types for the preview orchestrator

use thiserror::Error;

/// Main error type for the preview orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Scheduler, process or network failure in a backend
    #[error("Infrastructure error: {0}")]
    InfraError(String),

    /// The task is already gone; removal paths treat this as success
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Router API error: {0}")]
    RouterApiError(String),

    /// The log backend rate-limited the request
    #[error("Throttled: {0}")]
    ThrottlingError(String),

    /// A persisted handle could not be parsed; never retried
    #[error("Invalid task handle: {0}")]
    InvalidTaskHandle(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn is_task_not_found(&self) -> bool {
        matches!(self, OrchestratorError::TaskNotFound(_))
    }

    pub fn is_throttling(&self) -> bool {
        matches!(self, OrchestratorError::ThrottlingError(_))
    }
}
