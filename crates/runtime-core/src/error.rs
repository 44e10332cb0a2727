//! Error types for checkpoint storage and garbage collection

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for checkpoint storage management
#[derive(Error, Debug)]
pub enum Error {
    // Checkpoint lifecycle errors
    #[error("Checkpoint allocation failed: {message}")]
    Allocation { message: String },

    #[error("Checkpoint commit failed: {storage_id} - {message}")]
    Commit { storage_id: String, message: String },

    #[error("Checkpoint deletion failed: {storage_id} - {message}")]
    Deletion { storage_id: String, message: String },

    #[error("Checkpoint not found: {storage_id}")]
    CheckpointNotFound { storage_id: String },

    #[error("Invalid storage id {value:?}: {reason}")]
    InvalidStorageId { value: String, reason: String },

    #[error("Garbage collection failed for {failed} of {total} checkpoints")]
    GcFailed { failed: usize, total: usize },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Allocation { .. }
                | Error::Commit { .. }
                | Error::Deletion { .. }
                | Error::Storage { .. }
                | Error::StorageUnavailable { .. }
        )
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidStorageId { .. } | Error::InvalidConfig { .. } | Error::Internal { .. }
        )
    }

    /// Returns a retry delay hint in milliseconds, if applicable
    pub fn retry_delay_hint_ms(&self) -> Option<u64> {
        match self {
            Error::Allocation { .. } => Some(500),
            Error::Commit { .. } => Some(100),
            Error::Deletion { .. } => Some(100),
            Error::Storage { .. } => Some(100),
            Error::StorageUnavailable { .. } => Some(5000),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
