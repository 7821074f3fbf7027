//! Error types for the sync engine.

use stride_oplog::{DeadLetterReason, LogError};
use stride_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors returned by the engine's own API.
///
/// Delivery failures never surface here; the executor absorbs them into a
/// [`crate::RunReport`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// Operation log error.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Storage substrate error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The coordinator was created outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Log(e) => e.is_transient(),
            SyncError::Storage(e) => e.is_transient(),
            SyncError::InvalidConfig(_) | SyncError::NoRuntime => false,
        }
    }
}

/// Why a single delivery attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The request never reached the remote.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The remote failed transiently (5xx, 408, 429).
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Response message.
        message: String,
    },

    /// The remote rejected the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The remote reported a conflict it cannot merge.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl DeliveryError {
    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the operation should stay in the log for a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::Timeout | DeliveryError::Server { .. }
        )
    }

    /// Returns true if the whole run must stop.
    pub fn is_auth(&self) -> bool {
        matches!(self, DeliveryError::Auth(_))
    }

    /// Returns the dead-letter reason for permanent failures.
    pub fn dead_letter_reason(&self) -> Option<DeadLetterReason> {
        match self {
            DeliveryError::Validation(_) => Some(DeadLetterReason::Rejected),
            DeliveryError::Conflict(_) => Some(DeadLetterReason::Conflict),
            _ => None,
        }
    }
}

/// A failure that ended a run early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    /// The remote rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The operation log could not be written after retries.
    #[error("storage failure: {0}")]
    Storage(String),
}
