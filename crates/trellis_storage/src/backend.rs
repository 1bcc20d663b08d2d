//! Collaborator capability traits.
//!
//! The consistency core never talks to a concrete storage adapter. Each
//! component receives only the narrow capability it needs:
//!
//! | Trait | Consumer | Purpose |
//! |---|---|---|
//! | [`NounStore`] | periodic cleanup | list nouns, permanently delete a noun |
//! | [`VectorRemover`] | periodic cleanup | drop an id from the vector index |
//! | [`IndexRemover`] | periodic cleanup | drop an id from the metadata index |
//! | [`EntityStore`] | version manager | read/write live entity bodies, create commits |
//! | [`BlobStore`] | version storage/index | keyed byte persistence |
//!
//! All traits are object safe and `Send + Sync` so they can be shared as
//! `Arc<dyn Trait>` across tasks.

use crate::error::StorageResult;
use crate::types::{CommitRef, CommitRequest, NounPage, Pagination};
use async_trait::async_trait;
use serde_json::Value;

/// Primary noun storage, the durability source of truth.
///
/// # Invariants
///
/// - `delete_noun` is permanent; once it returns `Ok` the record is gone
/// - `get_nouns` pages are stable for a fixed offset while no writes happen
#[async_trait]
pub trait NounStore: Send + Sync {
    /// Permanently removes a noun record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend could not delete the record. Deleting
    /// an id that does not exist is not an error.
    async fn delete_noun(&self, id: &str) -> StorageResult<()>;

    /// Returns one page of nouns.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing failed.
    async fn get_nouns(&self, pagination: Pagination) -> StorageResult<NounPage>;
}

/// Removal capability of the vector index.
#[async_trait]
pub trait VectorRemover: Send + Sync {
    /// Removes `id` from the vector index.
    ///
    /// Returns `false` when the id was not indexed.
    async fn remove_item(&self, id: &str) -> StorageResult<bool>;
}

/// Removal capability of the metadata index.
#[async_trait]
pub trait IndexRemover: Send + Sync {
    /// Removes every metadata posting for `id`.
    async fn remove_from_index(&self, id: &str) -> StorageResult<()>;
}

/// Host entity store used by versioning.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Reads the live body of an entity, or `None` if it does not exist.
    async fn get_noun_metadata(&self, id: &str) -> StorageResult<Option<Value>>;

    /// Overwrites the live body of an entity.
    async fn save_noun_metadata(&self, id: &str, body: Value) -> StorageResult<()>;

    /// Creates a dataset-wide commit on the current branch and returns its hash.
    async fn commit(&self, request: CommitRequest) -> StorageResult<String>;

    /// Resolves the head of a branch.
    async fn get_ref(&self, branch: &str) -> StorageResult<Option<CommitRef>>;

    /// Name of the branch writes currently go to.
    async fn current_branch(&self) -> StorageResult<String>;
}

/// Keyed byte persistence.
///
/// Keys are `/`-separated paths; `list` is a prefix scan returning keys in
/// ascending order.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` under `key`, replacing any previous value.
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    /// Loads the value stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Deletes `key`. Returns whether a value was present.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Lists all keys starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
