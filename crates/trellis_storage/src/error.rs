//! Error types for collaborator operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by storage, index and entity-store collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested record does not exist.
    #[error("not found: {key}")]
    NotFound {
        /// Key or id that was looked up.
        key: String,
    },

    /// The backend rejected or failed the operation.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// The backend is temporarily unavailable (worth retrying).
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },

    /// The stored data could not be interpreted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::unavailable("throttled").is_transient());
        assert!(!StorageError::backend("rejected").is_transient());
        assert!(!StorageError::not_found("noun-1").is_transient());
    }

    #[test]
    fn error_display() {
        let err = StorageError::not_found("noun-7");
        assert_eq!(err.to_string(), "not found: noun-7");
    }
}
