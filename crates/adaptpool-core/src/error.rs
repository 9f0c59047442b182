//! Error types for the adaptpool executor.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while building, resizing or submitting to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task rejected: {0}")]
    Rejected(String),

    #[error("pool is shut down")]
    Shutdown,

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    #[error("task dropped before it ran")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
