//! In-memory collaborators for testing and ephemeral deployments.

use crate::backend::{BlobStore, EntityStore, IndexRemover, NounStore, VectorRemover};
use crate::error::StorageResult;
use crate::types::{mark_soft_deleted, CommitRef, CommitRequest, Noun, NounPage, Pagination};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default branch of a fresh [`InMemoryStore`].
pub const DEFAULT_BRANCH: &str = "main";

/// A commit recorded by [`InMemoryStore`].
///
/// Each commit holds a full copy of the noun map at commit time.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    /// Commit hash.
    pub hash: String,
    /// Parent commit on the same branch.
    pub parent: Option<String>,
    /// Branch the commit was made on.
    pub branch: String,
    /// Commit request as supplied by the caller.
    pub request: CommitRequest,
    /// Noun bodies at commit time.
    pub snapshot: BTreeMap<String, Value>,
}

/// An in-memory noun store, entity store and blob store.
///
/// Nouns are kept in a `BTreeMap` so listings page in a stable id order.
///
/// # Example
///
/// ```rust
/// use trellis_storage::InMemoryStore;
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// store.insert_noun("a", json!({"name": "alice"}));
/// assert!(store.soft_delete("a", 1_000));
/// assert_eq!(store.noun_count(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    nouns: RwLock<BTreeMap<String, Value>>,
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    commits: RwLock<Vec<CommitRecord>>,
    refs: RwLock<HashMap<String, CommitRef>>,
    branch: RwLock<String>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            nouns: RwLock::new(BTreeMap::new()),
            blobs: RwLock::new(BTreeMap::new()),
            commits: RwLock::new(Vec::new()),
            refs: RwLock::new(HashMap::new()),
            branch: RwLock::new(DEFAULT_BRANCH.to_string()),
        }
    }
}

impl InMemoryStore {
    /// Creates an empty store on the default branch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a noun.
    pub fn insert_noun(&self, id: impl Into<String>, metadata: Value) {
        self.nouns.write().insert(id.into(), metadata);
    }

    /// Returns the metadata of a noun.
    #[must_use]
    pub fn noun(&self, id: &str) -> Option<Value> {
        self.nouns.read().get(id).cloned()
    }

    /// Returns true if the noun exists.
    #[must_use]
    pub fn contains_noun(&self, id: &str) -> bool {
        self.nouns.read().contains_key(id)
    }

    /// Returns the number of stored nouns.
    #[must_use]
    pub fn noun_count(&self) -> usize {
        self.nouns.read().len()
    }

    /// Soft-deletes a noun at `at_millis`. Returns false if it does not exist.
    pub fn soft_delete(&self, id: &str, at_millis: u64) -> bool {
        match self.nouns.write().get_mut(id) {
            Some(metadata) => {
                mark_soft_deleted(metadata, at_millis);
                true
            }
            None => false,
        }
    }

    /// Switches the branch subsequent commits go to.
    pub fn switch_branch(&self, branch: impl Into<String>) {
        *self.branch.write() = branch.into();
    }

    /// Returns all recorded commits, oldest first.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.read().clone()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }
}

#[async_trait]
impl NounStore for InMemoryStore {
    async fn delete_noun(&self, id: &str) -> StorageResult<()> {
        self.nouns.write().remove(id);
        Ok(())
    }

    async fn get_nouns(&self, pagination: Pagination) -> StorageResult<NounPage> {
        let nouns = self.nouns.read();
        let items: Vec<Noun> = nouns
            .iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .map(|(id, metadata)| Noun::new(id.clone(), metadata.clone()))
            .collect();
        let end = pagination.offset.saturating_add(items.len());
        let has_more = end < nouns.len();
        Ok(NounPage {
            items,
            has_more,
            next_offset: has_more.then_some(end),
        })
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get_noun_metadata(&self, id: &str) -> StorageResult<Option<Value>> {
        Ok(self.noun(id))
    }

    async fn save_noun_metadata(&self, id: &str, body: Value) -> StorageResult<()> {
        self.insert_noun(id, body);
        Ok(())
    }

    async fn commit(&self, request: CommitRequest) -> StorageResult<String> {
        let branch = self.branch.read().clone();
        let hash = uuid::Uuid::new_v4().simple().to_string();
        let parent = self.refs.read().get(&branch).map(|r| r.commit_hash.clone());
        let snapshot = self.nouns.read().clone();

        self.commits.write().push(CommitRecord {
            hash: hash.clone(),
            parent,
            branch: branch.clone(),
            request,
            snapshot,
        });
        self.refs.write().insert(
            branch,
            CommitRef {
                commit_hash: hash.clone(),
            },
        );
        Ok(hash)
    }

    async fn get_ref(&self, branch: &str) -> StorageResult<Option<CommitRef>> {
        Ok(self.refs.read().get(branch).cloned())
    }

    async fn current_branch(&self) -> StorageResult<String> {
        Ok(self.branch.read().clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.blobs.write().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.blobs.write().remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// An in-memory vector index that only tracks membership.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    ids: RwLock<HashSet<String>>,
}

impl InMemoryVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an id to the index.
    pub fn insert(&self, id: impl Into<String>) {
        self.ids.write().insert(id.into());
    }

    /// Returns true if the id is indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.read().contains(id)
    }

    /// Returns the number of indexed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }
}

#[async_trait]
impl VectorRemover for InMemoryVectorIndex {
    async fn remove_item(&self, id: &str) -> StorageResult<bool> {
        Ok(self.ids.write().remove(id))
    }
}

/// An in-memory metadata index keyed by noun id.
#[derive(Debug, Default)]
pub struct InMemoryMetadataIndex {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryMetadataIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes the metadata of a noun.
    pub fn index(&self, id: impl Into<String>, metadata: Value) {
        self.entries.write().insert(id.into(), metadata);
    }

    /// Returns true if the id is indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Returns the number of indexed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl IndexRemover for InMemoryMetadataIndex {
    async fn remove_from_index(&self, id: &str) -> StorageResult<()> {
        self.entries.write().remove(id);
        Ok(())
    }
}
