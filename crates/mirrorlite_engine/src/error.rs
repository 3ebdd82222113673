//! Error types for the mirroring engine.

use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while mirroring the database.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network or object-storage failure.
    #[error("remote store error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Cold-start recovery failed. Fatal at startup.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The upload step of a sync cycle failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// SQLite error from the local database.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A remote operation exceeded the request timeout.
    #[error("remote operation timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Remote { retryable, .. } => *retryable,
            EngineError::Timeout(_) => true,
            _ => false,
        }
    }
}
