//! Error types for entity versioning.

use thiserror::Error;
use trellis_codec::CodecError;
use trellis_storage::StorageError;

/// Result type for versioning operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Errors that can occur while saving, loading or pruning versions.
#[derive(Debug, Error)]
pub enum VersionError {
    /// The live entity does not exist.
    #[error("entity not found: {entity_id}")]
    EntityNotFound {
        /// Entity id.
        entity_id: String,
    },

    /// No version matches the requested number or tag.
    #[error("version {reference} of {entity_id} not found")]
    VersionNotFound {
        /// Entity id.
        entity_id: String,
        /// The number or tag that failed to resolve.
        reference: String,
    },

    /// The branch has no commit to anchor a version to.
    #[error("branch {branch} has no commit; save with create_commit first")]
    NoCommit {
        /// Branch name.
        branch: String,
    },

    /// Options are incomplete or contradictory.
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// Description of the problem.
        message: String,
    },

    /// A stored body or record does not match what was expected.
    #[error("corrupted version data: {message}")]
    Corrupted {
        /// Description of the mismatch.
        message: String,
    },

    /// Collaborator storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl VersionError {
    /// Creates an entity-not-found error.
    pub fn entity_not_found(entity_id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_id: entity_id.into(),
        }
    }

    /// Creates a version-not-found error.
    pub fn version_not_found(entity_id: impl Into<String>, reference: impl ToString) -> Self {
        Self::VersionNotFound {
            entity_id: entity_id.into(),
            reference: reference.to_string(),
        }
    }

    /// Creates an invalid-options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Returns true for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound { .. } | Self::VersionNotFound { .. }
        )
    }
}
