//! Shared collaborator types and the soft-delete convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata flag marking a noun as soft-deleted.
pub const DELETED_FIELD: &str = "_deleted";

/// Metadata field holding the last update time in milliseconds since the
/// Unix epoch. For soft-deleted nouns this is the deletion time.
pub const UPDATED_AT_FIELD: &str = "_updatedAt";

/// A noun as returned by a storage listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Noun {
    /// Noun id.
    pub id: String,
    /// Metadata body.
    pub metadata: Value,
}

impl Noun {
    /// Creates a noun.
    pub fn new(id: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: id.into(),
            metadata,
        }
    }

    /// Returns true if the noun carries the soft-delete marker.
    pub fn is_soft_deleted(&self) -> bool {
        is_soft_deleted(&self.metadata)
    }
}

/// Offset pagination for storage listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Index of the first item to return.
    pub offset: usize,
    /// Maximum number of items to return.
    pub limit: usize,
}

impl Pagination {
    /// Creates a pagination window.
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// First page with the given size.
    pub fn first(limit: usize) -> Self {
        Self::new(0, limit)
    }
}

/// One page of a noun listing.
#[derive(Debug, Clone, Default)]
pub struct NounPage {
    /// Items in this page.
    pub items: Vec<Noun>,
    /// Whether more items follow.
    pub has_more: bool,
    /// Offset of the next page, if any.
    pub next_offset: Option<usize>,
}

/// Parameters of a host-level commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Commit message.
    pub message: String,
    /// Commit author.
    pub author: Option<String>,
    /// Arbitrary commit metadata.
    pub metadata: Option<Value>,
}

impl CommitRequest {
    /// Creates a commit request with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Head of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Hash of the commit the branch points at.
    pub commit_hash: String,
}

/// Returns true if `metadata` carries the soft-delete marker.
pub fn is_soft_deleted(metadata: &Value) -> bool {
    metadata
        .get(DELETED_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Returns the deletion time of a soft-deleted noun.
///
/// `None` when the noun is not soft-deleted or carries no usable timestamp.
pub fn deleted_at(metadata: &Value) -> Option<u64> {
    if !is_soft_deleted(metadata) {
        return None;
    }
    metadata.get(UPDATED_AT_FIELD).and_then(Value::as_u64)
}

/// Marks `metadata` as soft-deleted at `at_millis`.
///
/// Non-object metadata is replaced by an object holding only the marker.
pub fn mark_soft_deleted(metadata: &mut Value, at_millis: u64) {
    if !metadata.is_object() {
        *metadata = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = metadata {
        map.insert(DELETED_FIELD.to_string(), Value::Bool(true));
        map.insert(UPDATED_AT_FIELD.to_string(), Value::from(at_millis));
    }
}
