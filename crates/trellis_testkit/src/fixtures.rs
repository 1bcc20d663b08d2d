//! Failure-injecting collaborators.
//!
//! Each fixture wraps an in-memory implementation, records the calls it
//! receives in a shared [`CallLog`], and can be told to fail for chosen ids.
//! Sharing one log across storage and both indexes lets tests assert the
//! cross-collaborator order of a cleanup pass.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_core::{BulkWriter, CoreError, CoreResult};
use trellis_storage::{
    mark_soft_deleted, IndexRemover, InMemoryMetadataIndex, InMemoryStore, InMemoryVectorIndex,
    NounPage, NounStore, Pagination, StorageError, StorageResult, VectorRemover,
};

/// Collaborator that received a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collaborator {
    /// Noun storage.
    Storage,
    /// Vector index.
    Vector,
    /// Metadata index.
    Metadata,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Who was called.
    pub target: Collaborator,
    /// Id the call was about.
    pub id: String,
    /// Whether the call succeeded.
    pub ok: bool,
}

/// Ordered record of collaborator calls, shareable across fixtures.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, target: Collaborator, id: &str, ok: bool) {
        self.calls.lock().push(Call {
            target,
            id: id.to_string(),
            ok,
        });
    }

    /// All calls, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Collaborators called for `id`, in order.
    pub fn targets_for(&self, id: &str) -> Vec<Collaborator> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.id == id)
            .map(|c| c.target)
            .collect()
    }

    /// Number of calls made to `target`.
    pub fn count(&self, target: Collaborator) -> usize {
        self.calls.lock().iter().filter(|c| c.target == target).count()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

fn injected(what: &str, id: &str) -> StorageError {
    StorageError::backend(format!("injected {what} failure for {id}"))
}

/// Noun store whose deletes and listings can be made to fail.
#[derive(Debug)]
pub struct FaultyNounStore {
    inner: Arc<InMemoryStore>,
    log: CallLog,
    failing_deletes: Mutex<HashSet<String>>,
    failing_listing: AtomicBool,
}

impl FaultyNounStore {
    /// Wraps `inner`, recording into `log`.
    pub fn new(inner: Arc<InMemoryStore>, log: CallLog) -> Self {
        Self {
            inner,
            log,
            failing_deletes: Mutex::new(HashSet::new()),
            failing_listing: AtomicBool::new(false),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    /// Makes deleting `id` fail.
    pub fn fail_delete(&self, id: impl Into<String>) {
        self.failing_deletes.lock().insert(id.into());
    }

    /// Makes every listing fail (or succeed again).
    pub fn fail_listing(&self, fail: bool) {
        self.failing_listing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NounStore for FaultyNounStore {
    async fn delete_noun(&self, id: &str) -> StorageResult<()> {
        if self.failing_deletes.lock().contains(id) {
            self.log.record(Collaborator::Storage, id, false);
            return Err(injected("delete", id));
        }
        self.inner.delete_noun(id).await?;
        self.log.record(Collaborator::Storage, id, true);
        Ok(())
    }

    async fn get_nouns(&self, pagination: Pagination) -> StorageResult<NounPage> {
        if self.failing_listing.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("injected listing failure"));
        }
        self.inner.get_nouns(pagination).await
    }
}

/// Vector index that records removals and can fail for chosen ids.
#[derive(Debug)]
pub struct RecordingVectorIndex {
    inner: InMemoryVectorIndex,
    log: CallLog,
    failing: Mutex<HashSet<String>>,
}

impl RecordingVectorIndex {
    /// Creates an empty index recording into `log`.
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: InMemoryVectorIndex::new(),
            log,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// The wrapped index.
    pub fn inner(&self) -> &InMemoryVectorIndex {
        &self.inner
    }

    /// Makes removing `id` fail.
    pub fn fail_on(&self, id: impl Into<String>) {
        self.failing.lock().insert(id.into());
    }
}

#[async_trait]
impl VectorRemover for RecordingVectorIndex {
    async fn remove_item(&self, id: &str) -> StorageResult<bool> {
        if self.failing.lock().contains(id) {
            self.log.record(Collaborator::Vector, id, false);
            return Err(injected("vector removal", id));
        }
        let removed = self.inner.remove_item(id).await?;
        self.log.record(Collaborator::Vector, id, true);
        Ok(removed)
    }
}

/// Metadata index that records removals and can fail for chosen ids.
#[derive(Debug)]
pub struct RecordingMetadataIndex {
    inner: InMemoryMetadataIndex,
    log: CallLog,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMetadataIndex {
    /// Creates an empty index recording into `log`.
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: InMemoryMetadataIndex::new(),
            log,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// The wrapped index.
    pub fn inner(&self) -> &InMemoryMetadataIndex {
        &self.inner
    }

    /// Makes removing `id` fail.
    pub fn fail_on(&self, id: impl Into<String>) {
        self.failing.lock().insert(id.into());
    }
}

#[async_trait]
impl IndexRemover for RecordingMetadataIndex {
    async fn remove_from_index(&self, id: &str) -> StorageResult<()> {
        if self.failing.lock().contains(id) {
            self.log.record(Collaborator::Metadata, id, false);
            return Err(injected("metadata removal", id));
        }
        self.inner.remove_from_index(id).await?;
        self.log.record(Collaborator::Metadata, id, true);
        Ok(())
    }
}

/// Storage plus both indexes sharing one [`CallLog`].
#[derive(Debug, Clone)]
pub struct CleanupFixture {
    /// Noun storage.
    pub store: Arc<FaultyNounStore>,
    /// Vector index.
    pub vectors: Arc<RecordingVectorIndex>,
    /// Metadata index.
    pub metadata: Arc<RecordingMetadataIndex>,
    /// Calls made to all three.
    pub log: CallLog,
}

impl Default for CleanupFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupFixture {
    /// Creates empty collaborators.
    pub fn new() -> Self {
        let log = CallLog::new();
        Self {
            store: Arc::new(FaultyNounStore::new(
                Arc::new(InMemoryStore::new()),
                log.clone(),
            )),
            vectors: Arc::new(RecordingVectorIndex::new(log.clone())),
            metadata: Arc::new(RecordingMetadataIndex::new(log.clone())),
            log,
        }
    }

    /// Inserts a live noun into storage and both indexes.
    pub fn insert(&self, id: &str, metadata: Value) {
        self.store.inner().insert_noun(id, metadata.clone());
        self.vectors.inner().insert(id);
        self.metadata.inner().index(id, metadata);
    }

    /// Inserts a noun soft-deleted at `deleted_at` into storage and both
    /// indexes.
    pub fn insert_deleted(&self, id: &str, deleted_at: u64) {
        let mut metadata = serde_json::json!({ "id": id });
        mark_soft_deleted(&mut metadata, deleted_at);
        self.insert(id, metadata);
    }

    /// Returns true if `id` is present in storage.
    pub fn in_storage(&self, id: &str) -> bool {
        self.store.inner().contains_noun(id)
    }

    /// Returns true if `id` is present in either index.
    pub fn in_any_index(&self, id: &str) -> bool {
        self.vectors.inner().contains(id) || self.metadata.inner().contains(id)
    }
}

/// Bulk writer that records batches and fails on demand.
///
/// Failures are scheduled with [`fail_next`](Self::fail_next) (a count of
/// upcoming calls) or [`fail_always`](Self::fail_always).
#[derive(Debug)]
pub struct FlakyWriter<T> {
    batches: Mutex<Vec<HashMap<String, T>>>,
    fail_next: AtomicU32,
    fail_always: AtomicBool,
    attempts: AtomicUsize,
}

impl<T> Default for FlakyWriter<T> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            fail_always: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> FlakyWriter<T> {
    /// Creates a writer that succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` calls.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fails every call until switched off.
    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Calls made, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully written batches, in order.
    pub fn batches(&self) -> Vec<HashMap<String, T>> {
        self.batches.lock().clone()
    }

    /// Last successfully written value per id.
    pub fn written(&self) -> BTreeMap<String, T> {
        let mut out = BTreeMap::new();
        for batch in self.batches.lock().iter() {
            for (id, value) in batch {
                out.insert(id.clone(), value.clone());
            }
        }
        out
    }

    /// Number of times `id` was written successfully.
    pub fn write_count(&self, id: &str) -> usize {
        self.batches
            .lock()
            .iter()
            .filter(|batch| batch.contains_key(id))
            .count()
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<T> BulkWriter<T> for FlakyWriter<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn write_batch(&self, items: HashMap<String, T>) -> CoreResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(CoreError::write_failed(format!(
                "injected failure for {} items",
                items.len()
            )));
        }
        self.batches.lock().push(items);
        Ok(())
    }
}
