//! Error types for the operation log.

use stride_storage::StorageError;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in operation log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Storage substrate error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A persisted record could not be interpreted.
    #[error("corrupted record {key}: {message}")]
    Corrupted {
        /// Store key of the bad record.
        key: String,
        /// Description of the problem.
        message: String,
    },
}

impl LogError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LogError::Storage(e) => e.is_transient(),
            LogError::Codec(_) | LogError::Corrupted { .. } => false,
        }
    }

    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
