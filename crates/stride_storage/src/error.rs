//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store has no room left for the write.
    #[error("storage full: write of {requested} bytes exceeds quota of {quota} bytes")]
    Full {
        /// Size of the rejected write in bytes.
        requested: u64,
        /// Configured quota in bytes.
        quota: u64,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the journal lock.
    #[error("storage locked: {} is held by another process", path.display())]
    Locked {
        /// Path of the locked journal.
        path: PathBuf,
    },

    /// The store is unavailable (used by fault injection in tests).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if retrying the same call may succeed.
    ///
    /// Corruption and lock contention are not transient; a full store may
    /// drain once operations are delivered, so it is treated as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            StorageError::Full { .. } | StorageError::Unavailable(_) => true,
            StorageError::Corrupted(_) | StorageError::Locked { .. } => false,
        }
    }
}
