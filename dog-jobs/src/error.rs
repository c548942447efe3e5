use thiserror::Error;

use crate::JobId;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Malformed job definition, rejected before it reaches the queue
    #[error("Invalid job: {0}")]
    Validation(String),

    /// The configured store could not be reached or answered with an error
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job {0} is already in a terminal state")]
    JobAlreadyTerminal(JobId),

    #[error("Handler already registered for job type: {0}")]
    HandlerAlreadyRegistered(String),

    #[error("Backend does not support feature: {0}")]
    BackendUnsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker did not stop within the shutdown timeout")]
    ShutdownTimeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Retryable error - job is re-queued while retries remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// No handler registered for the job type
    #[error("No handler for job type: {0}")]
    HandlerNotFound(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) | Self::HandlerNotFound(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// A payload that does not match the handler's shape will not start matching on retry.
impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::Permanent(format!("Invalid payload: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::BackendUnavailable(err.to_string())
    }
}
