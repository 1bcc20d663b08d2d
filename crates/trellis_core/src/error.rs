//! Error types for Trellis core.

use thiserror::Error;
use trellis_storage::StorageError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Trellis core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage collaborator error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A bulk write function rejected a batch.
    #[error("write failed: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// A buffered item exceeded its retry budget.
    #[error("write {id} failed permanently after {attempts} attempts")]
    RetryExhausted {
        /// Id of the dropped item.
        id: String,
        /// Number of flush attempts made.
        attempts: u32,
    },

    /// The backpressure queue is full.
    #[error("overloaded: {queue_length} operations already queued")]
    Overloaded {
        /// Queue length at the time of rejection.
        queue_length: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The component was shut down while the caller was waiting.
    #[error("component stopped")]
    Stopped,
}

impl CoreError {
    /// Creates a write failed error.
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::WriteFailed { .. } | Self::Overloaded { .. } => true,
            Self::RetryExhausted { .. } | Self::InvalidConfig { .. } | Self::Stopped => false,
        }
    }
}
