//! Entity version management.

use crate::diff::{DiffOptions, DiffResult, VersionDiff};
use crate::error::{VersionError, VersionResult};
use crate::index::VersionIndex;
use crate::storage::VersionStorage;
use crate::types::{
    EntityVersion, PruneOptions, PruneResult, RestoreOptions, SaveVersionOptions, VersionQuery,
    VersionRef,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use trellis_codec::content_hash;
use trellis_core::{Clock, SystemClock};
use trellis_storage::{BlobStore, CommitRequest, EntityStore};

/// Lock map entries are dropped once this many accumulate and are idle.
const LOCK_MAP_SWEEP_THRESHOLD: usize = 1024;

type LockKey = (String, String);

/// Saves, lists, restores, compares and prunes entity versions.
///
/// Versions are numbered per (entity, branch) and anchored to a host commit.
/// Mutations of one (entity, branch) are serialized, so concurrent saves
/// never allocate the same number.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use trellis_storage::InMemoryStore;
/// use trellis_versioning::{SaveVersionOptions, VersionManager};
///
/// # tokio_test_block_on(async {
/// let store = Arc::new(InMemoryStore::new());
/// store.insert_noun("user-1", json!({"name": "alice"}));
///
/// let versions = VersionManager::new(store.clone(), store.clone());
/// let v1 = versions
///     .save("user-1", SaveVersionOptions::new().create_commit(true))
///     .await
///     .unwrap();
/// assert_eq!(v1.version, 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct VersionManager {
    entities: Arc<dyn EntityStore>,
    storage: VersionStorage,
    index: VersionIndex,
    differ: VersionDiff,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl VersionManager {
    /// Creates a manager over a host entity store and a blob store.
    pub fn new(entities: Arc<dyn EntityStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            entities,
            storage: VersionStorage::new(Arc::clone(&blobs)),
            index: VersionIndex::new(blobs),
            differ: VersionDiff::default(),
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the clock used for version timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the diff options used by [`compare`](Self::compare).
    #[must_use]
    pub fn with_diff_options(mut self, options: DiffOptions) -> Self {
        self.differ = VersionDiff::new(options);
        self
    }

    /// The body storage.
    pub fn storage(&self) -> &VersionStorage {
        &self.storage
    }

    /// The metadata index.
    pub fn index(&self) -> &VersionIndex {
        &self.index
    }

    /// Saves the current state of an entity as a new version.
    ///
    /// If the body hashes the same as the newest version on the current
    /// branch, that version is returned unchanged and nothing is written.
    ///
    /// # Errors
    ///
    /// - [`VersionError::EntityNotFound`] if the entity does not exist
    /// - [`VersionError::NoCommit`] if `create_commit` is unset and the
    ///   branch has no commit yet
    /// - storage and codec errors from the collaborators
    pub async fn save(
        &self,
        entity_id: &str,
        options: SaveVersionOptions,
    ) -> VersionResult<EntityVersion> {
        let branch = self.entities.current_branch().await?;
        let lock = self.lock_for(entity_id, &branch);
        let _guard = lock.lock().await;

        let body = self
            .entities
            .get_noun_metadata(entity_id)
            .await?
            .ok_or_else(|| VersionError::entity_not_found(entity_id))?;
        let hash = content_hash(&body)?;

        let latest = self.index.latest(entity_id, &branch).await?;
        if let Some(latest) = latest.as_ref().filter(|v| v.content_hash == hash) {
            debug!(entity_id, branch = %branch, version = latest.version, "content unchanged");
            return Ok(latest.clone());
        }
        let next = latest.map_or(1, |v| v.version + 1);

        let commit_hash = if options.create_commit {
            let message = options
                .commit_message
                .clone()
                .unwrap_or_else(|| format!("Version {next} of {entity_id}"));
            let mut request = CommitRequest::new(message);
            request.author = options.author.clone();
            request.metadata = options.metadata.clone();
            self.entities.commit(request).await?
        } else {
            self.entities
                .get_ref(&branch)
                .await?
                .ok_or_else(|| VersionError::NoCommit {
                    branch: branch.clone(),
                })?
                .commit_hash
        };

        self.storage.store(&body).await?;
        let version = EntityVersion {
            version: next,
            entity_id: entity_id.to_string(),
            branch: branch.clone(),
            commit_hash,
            timestamp: self.clock.now_millis(),
            tag: options.tag,
            description: options.description,
            content_hash: hash,
            author: options.author,
            metadata: options.metadata,
        };

        if let Err(e) = self.index.add(&version).await {
            if let Err(release_err) = self.storage.release(&version.content_hash).await {
                warn!(entity_id, error = %release_err, "failed to release body after index failure");
            }
            return Err(e);
        }

        info!(
            entity_id,
            branch = %branch,
            version = next,
            tag = version.tag.as_deref().unwrap_or(""),
            "saved version"
        );
        Ok(version)
    }

    /// Lists versions matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn list(
        &self,
        entity_id: &str,
        query: VersionQuery,
    ) -> VersionResult<Vec<EntityVersion>> {
        let branch = match &query.branch {
            Some(branch) => branch.clone(),
            None => self.entities.current_branch().await?,
        };
        self.index.query(entity_id, &branch, &query).await
    }

    /// Looks up a version by number on the current branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn get_version(
        &self,
        entity_id: &str,
        version: u32,
    ) -> VersionResult<Option<EntityVersion>> {
        let branch = self.entities.current_branch().await?;
        self.index.get(entity_id, &branch, version).await
    }

    /// Looks up the newest version carrying `tag` on the current branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn get_version_by_tag(
        &self,
        entity_id: &str,
        tag: &str,
    ) -> VersionResult<Option<EntityVersion>> {
        let branch = self.entities.current_branch().await?;
        self.index.get_by_tag(entity_id, &branch, tag).await
    }

    /// Loads the stored body of a version.
    ///
    /// # Errors
    ///
    /// [`VersionError::VersionNotFound`] if the reference does not resolve,
    /// [`VersionError::Corrupted`] if the body is missing or altered.
    pub async fn get_content(
        &self,
        entity_id: &str,
        version: impl Into<VersionRef>,
    ) -> VersionResult<serde_json::Value> {
        let branch = self.entities.current_branch().await?;
        let version = self.resolve(entity_id, &branch, &version.into()).await?;
        self.storage.load_version(&version).await
    }

    /// Overwrites the live entity with a stored version.
    ///
    /// Returns the restored version. With `create_snapshot`, the current
    /// state is saved first under `snapshot_tag`; the snapshot is skipped if
    /// the live entity no longer exists.
    ///
    /// # Errors
    ///
    /// [`VersionError::VersionNotFound`] if the reference does not resolve.
    /// Nothing is written in that case.
    pub async fn restore(
        &self,
        entity_id: &str,
        version: impl Into<VersionRef>,
        options: RestoreOptions,
    ) -> VersionResult<EntityVersion> {
        let branch = self.entities.current_branch().await?;
        let target = self.resolve(entity_id, &branch, &version.into()).await?;
        let body = self.storage.load_version(&target).await?;

        if options.create_snapshot {
            let snapshot = SaveVersionOptions::new()
                .tag(options.snapshot_tag.clone())
                .description(format!("Snapshot before restoring version {}", target.version));
            match self.save(entity_id, snapshot).await {
                Ok(saved) => {
                    debug!(entity_id, version = saved.version, "saved pre-restore snapshot");
                }
                Err(VersionError::EntityNotFound { .. }) => {
                    debug!(entity_id, "entity missing, no pre-restore snapshot");
                }
                Err(e) => return Err(e),
            }
        }

        self.entities.save_noun_metadata(entity_id, body).await?;
        info!(entity_id, branch = %branch, version = target.version, "restored version");
        Ok(target)
    }

    /// Restores the version preceding the newest one, without a snapshot.
    ///
    /// Returns `None` when fewer than two versions exist.
    ///
    /// # Errors
    ///
    /// See [`restore`](Self::restore).
    pub async fn undo(&self, entity_id: &str) -> VersionResult<Option<EntityVersion>> {
        let branch = self.entities.current_branch().await?;
        let versions = self.index.list_all(entity_id, &branch).await?;
        let Some(previous) = versions.iter().rev().nth(1) else {
            return Ok(None);
        };
        let restored = self
            .restore(entity_id, previous.version, RestoreOptions::new())
            .await?;
        Ok(Some(restored))
    }

    /// Compares two stored versions.
    ///
    /// # Errors
    ///
    /// [`VersionError::VersionNotFound`] if either reference does not
    /// resolve, or the error from loading either body.
    pub async fn compare(
        &self,
        entity_id: &str,
        from: impl Into<VersionRef>,
        to: impl Into<VersionRef>,
    ) -> VersionResult<DiffResult> {
        let branch = self.entities.current_branch().await?;
        let from = self.resolve(entity_id, &branch, &from.into()).await?;
        let to = self.resolve(entity_id, &branch, &to.into()).await?;
        let from_body = self.storage.load_version(&from).await?;
        let to_body = self.storage.load_version(&to).await?;
        Ok(self
            .differ
            .compare(&from_body, &to_body, Some(from.version), Some(to.version)))
    }

    /// Compares a stored version with the live entity.
    ///
    /// # Errors
    ///
    /// As [`compare`](Self::compare), plus [`VersionError::EntityNotFound`]
    /// if the live entity does not exist.
    pub async fn compare_with_current(
        &self,
        entity_id: &str,
        from: impl Into<VersionRef>,
    ) -> VersionResult<DiffResult> {
        let branch = self.entities.current_branch().await?;
        let from = self.resolve(entity_id, &branch, &from.into()).await?;
        let from_body = self.storage.load_version(&from).await?;
        let current = self
            .entities
            .get_noun_metadata(entity_id)
            .await?
            .ok_or_else(|| VersionError::entity_not_found(entity_id))?;
        Ok(self
            .differ
            .compare(&from_body, &current, Some(from.version), None))
    }

    /// Deletes versions not covered by any keep rule.
    ///
    /// # Errors
    ///
    /// [`VersionError::InvalidOptions`] if no keep rule is set, or the first
    /// storage error hit while deleting. Versions deleted before the error
    /// stay deleted.
    pub async fn prune(&self, entity_id: &str, options: PruneOptions) -> VersionResult<PruneResult> {
        options.validate()?;
        let branch = self.entities.current_branch().await?;
        let lock = self.lock_for(entity_id, &branch);
        let _guard = lock.lock().await;

        let versions = self.index.list_all(entity_id, &branch).await?;
        let newest_first = versions.iter().rev().enumerate();
        let mut doomed: Vec<&EntityVersion> = newest_first
            .filter(|(rank, v)| !options.keeps(v, *rank))
            .map(|(_, v)| v)
            .collect();
        doomed.sort_by_key(|v| v.version);

        let result = PruneResult {
            deleted: doomed.len(),
            kept: versions.len() - doomed.len(),
            deleted_versions: doomed.iter().map(|v| v.version).collect(),
            dry_run: options.dry_run,
        };
        if options.dry_run {
            debug!(entity_id, would_delete = result.deleted, "prune dry run");
            return Ok(result);
        }

        self.delete_versions(&doomed).await?;
        info!(
            entity_id,
            branch = %branch,
            deleted = result.deleted,
            kept = result.kept,
            "pruned versions"
        );
        Ok(result)
    }

    /// The newest version on the current branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn get_latest(&self, entity_id: &str) -> VersionResult<Option<EntityVersion>> {
        let branch = self.entities.current_branch().await?;
        self.index.latest(entity_id, &branch).await
    }

    /// Returns true if the entity has any version on the current branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn has_versions(&self, entity_id: &str) -> VersionResult<bool> {
        Ok(self.get_version_count(entity_id).await? > 0)
    }

    /// Number of versions on the current branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn get_version_count(&self, entity_id: &str) -> VersionResult<usize> {
        let branch = self.entities.current_branch().await?;
        self.index.count(entity_id, &branch).await
    }

    /// Deletes every version on the current branch. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns the first storage error hit while deleting.
    pub async fn clear(&self, entity_id: &str) -> VersionResult<usize> {
        let branch = self.entities.current_branch().await?;
        let lock = self.lock_for(entity_id, &branch);
        let _guard = lock.lock().await;

        let versions = self.index.list_all(entity_id, &branch).await?;
        let all: Vec<&EntityVersion> = versions.iter().collect();
        self.delete_versions(&all).await?;
        self.index.evict(entity_id, &branch);
        info!(entity_id, branch = %branch, deleted = all.len(), "cleared versions");
        Ok(all.len())
    }

    async fn delete_versions(&self, versions: &[&EntityVersion]) -> VersionResult<()> {
        for version in versions {
            // Index first: a leaked body is harmless, a dangling record is not.
            self.index
                .remove(&version.entity_id, &version.branch, version.version)
                .await?;
            self.storage.release(&version.content_hash).await?;
        }
        Ok(())
    }

    async fn resolve(
        &self,
        entity_id: &str,
        branch: &str,
        reference: &VersionRef,
    ) -> VersionResult<EntityVersion> {
        let found = match reference {
            VersionRef::Number(n) => self.index.get(entity_id, branch, *n).await?,
            VersionRef::Tag(tag) => self.index.get_by_tag(entity_id, branch, tag).await?,
        };
        found.ok_or_else(|| VersionError::version_not_found(entity_id, reference))
    }

    fn lock_for(&self, entity_id: &str, branch: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() >= LOCK_MAP_SWEEP_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(
            locks
                .entry((entity_id.to_string(), branch.to_string()))
                .or_default(),
        )
    }
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("index", &self.index)
            .field("locks", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use trellis_core::ManualClock;
    use trellis_storage::{InMemoryStore, StorageError, StorageResult};

    fn manager() -> (Arc<InMemoryStore>, Arc<ManualClock>, VersionManager) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = VersionManager::new(store.clone(), store.clone()).with_clock(clock.clone());
        (store, clock, manager)
    }

    fn commit() -> SaveVersionOptions {
        SaveVersionOptions::new().create_commit(true)
    }

    /// Saves `count` distinct bodies of entity "e", one second apart.
    async fn saved(count: u32) -> (Arc<InMemoryStore>, Arc<ManualClock>, VersionManager) {
        let (store, clock, manager) = manager();
        for n in 1..=count {
            store.insert_noun("e", json!({"n": n}));
            manager.save("e", commit()).await.unwrap();
            clock.advance(std::time::Duration::from_secs(1));
        }
        (store, clock, manager)
    }

    #[tokio::test]
    async fn save_assigns_sequential_numbers() {
        let (store, _, manager) = saved(3).await;
        let versions = manager.list("e", VersionQuery::new()).await.unwrap();
        assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(store.commits().len(), 3);
        assert_eq!(store.commits()[0].request.message, "Version 1 of e");
    }

    #[tokio::test]
    async fn unchanged_content_returns_the_same_version() {
        let (store, _, manager) = manager();
        store.insert_noun("e", json!({"a": 1, "b": 2}));
        let first = manager.save("e", commit()).await.unwrap();

        store.insert_noun("e", json!({"b": 2, "a": 1}));
        let second = manager.save("e", commit().tag("ignored")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.get_version_count("e").await.unwrap(), 1);
        assert_eq!(store.commits().len(), 1);
    }

    #[tokio::test]
    async fn save_without_commit_uses_branch_head() {
        let (store, _, manager) = manager();
        store.insert_noun("e", json!({"a": 1}));

        let err = manager.save("e", SaveVersionOptions::new()).await.unwrap_err();
        assert!(matches!(err, VersionError::NoCommit { .. }));

        let head = store.commit(CommitRequest::new("init")).await.unwrap();
        let v = manager.save("e", SaveVersionOptions::new()).await.unwrap();
        assert_eq!(v.commit_hash, head);
    }

    #[tokio::test]
    async fn save_missing_entity_fails() {
        let (_, _, manager) = manager();
        let err = manager.save("ghost", commit()).await.unwrap_err();
        assert!(matches!(err, VersionError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn save_records_options() {
        let (store, _, manager) = manager();
        store.insert_noun("e", json!({"a": 1}));
        let v = manager
            .save(
                "e",
                commit()
                    .tag("v1")
                    .description("first")
                    .author("ops")
                    .metadata(json!({"ticket": 7}))
                    .commit_message("initial import"),
            )
            .await
            .unwrap();

        assert_eq!(v.tag.as_deref(), Some("v1"));
        assert_eq!(v.author.as_deref(), Some("ops"));
        assert_eq!(v.timestamp, 1_000);
        let commit = &store.commits()[0];
        assert_eq!(commit.request.message, "initial import");
        assert_eq!(commit.request.author.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn restore_round_trips_the_body() {
        let (store, _, manager) = manager();
        let original = json!({"name": "alice", "tags": ["x"], "score": 2.5});
        store.insert_noun("e", original.clone());
        manager.save("e", commit()).await.unwrap();

        store.insert_noun("e", json!({"name": "bob"}));
        let restored = manager.restore("e", 1, RestoreOptions::new()).await.unwrap();

        assert_eq!(restored.version, 1);
        assert_eq!(store.noun("e"), Some(original));
    }

    #[tokio::test]
    async fn restore_with_snapshot_saves_current_state() {
        let (store, _, manager) = saved(2).await;
        store.insert_noun("e", json!({"n": "edited"}));

        manager
            .restore("e", 1, RestoreOptions::new().create_snapshot(true))
            .await
            .unwrap();

        let snapshot = manager
            .get_version_by_tag("e", crate::BEFORE_RESTORE_TAG)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(
            manager.get_content("e", 3).await.unwrap(),
            json!({"n": "edited"})
        );
        assert_eq!(store.noun("e"), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn restore_unknown_version_writes_nothing() {
        let (store, _, manager) = saved(1).await;
        store.insert_noun("e", json!({"n": "live"}));

        let err = manager
            .restore("e", "nope", RestoreOptions::new().create_snapshot(true))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::VersionNotFound { .. }));
        assert_eq!(store.noun("e"), Some(json!({"n": "live"})));
        assert_eq!(manager.get_version_count("e").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restore_by_tag() {
        let (store, _, manager) = manager();
        store.insert_noun("e", json!({"stage": "draft"}));
        manager.save("e", commit().tag("draft")).await.unwrap();
        store.insert_noun("e", json!({"stage": "final"}));
        manager.save("e", commit()).await.unwrap();

        manager.restore("e", "draft", RestoreOptions::new()).await.unwrap();
        assert_eq!(store.noun("e"), Some(json!({"stage": "draft"})));
    }

    #[tokio::test]
    async fn undo_restores_the_previous_version() {
        let (store, _, manager) = saved(1).await;
        assert!(manager.undo("e").await.unwrap().is_none());

        store.insert_noun("e", json!({"n": 2}));
        manager.save("e", commit()).await.unwrap();
        let restored = manager.undo("e").await.unwrap().unwrap();
        assert_eq!(restored.version, 1);
        assert_eq!(store.noun("e"), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn compare_versions_and_current() {
        let (store, _, manager) = manager();
        store.insert_noun("e", json!({"name": "alice", "age": 30}));
        manager.save("e", commit()).await.unwrap();
        store.insert_noun("e", json!({"name": "alice", "age": 31, "city": "oslo"}));
        manager.save("e", commit()).await.unwrap();

        let diff = manager.compare("e", 1, 2).await.unwrap();
        assert_eq!(diff.from_version, Some(1));
        assert_eq!(diff.to_version, Some(2));
        assert!(diff.modified.contains_key("age"));
        assert!(diff.added.contains_key("city"));

        store.insert_noun("e", json!({"name": "alice"}));
        let live = manager.compare_with_current("e", 2).await.unwrap();
        assert_eq!(live.to_version, None);
        assert_eq!(live.removed.len(), 2);

        let err = manager.compare("e", 1, 9).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn compare_honours_ignored_fields() {
        let store = Arc::new(InMemoryStore::new());
        let manager = VersionManager::new(store.clone(), store.clone())
            .with_diff_options(DiffOptions::new().ignore_field("_updatedAt"));
        store.insert_noun("e", json!({"a": 1, "_updatedAt": 1}));
        manager.save("e", commit()).await.unwrap();
        store.insert_noun("e", json!({"a": 1, "_updatedAt": 2}));
        manager.save("e", commit()).await.unwrap();

        assert!(manager.compare("e", 1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_recent_and_tagged() {
        let (store, _, manager) = manager();
        for n in 1..=5u32 {
            store.insert_noun("e", json!({"n": n}));
            let options = if n == 2 { commit().tag("milestone") } else { commit() };
            manager.save("e", options).await.unwrap();
        }

        let dry = manager
            .prune("e", PruneOptions::new().keep_recent(2).dry_run(true))
            .await
            .unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.deleted_versions, vec![1, 3]);
        assert_eq!(manager.get_version_count("e").await.unwrap(), 5);

        let result = manager
            .prune("e", PruneOptions::new().keep_recent(2))
            .await
            .unwrap();
        assert_eq!(result.deleted, 2);
        assert_eq!(result.kept, 3);

        let left: Vec<u32> = manager
            .list("e", VersionQuery::new())
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(left, vec![5, 4, 2]);
        assert!(manager.get_content("e", 2).await.is_ok());
    }

    #[tokio::test]
    async fn prune_by_age() {
        let (_, _, manager) = saved(4).await;
        // Timestamps are 1000, 2000, 3000, 4000.
        let result = manager
            .prune("e", PruneOptions::new().keep_after(2_000))
            .await
            .unwrap();
        assert_eq!(result.deleted_versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn prune_requires_a_keep_rule() {
        let (_, _, manager) = saved(1).await;
        let err = manager.prune("e", PruneOptions::new()).await.unwrap_err();
        assert!(matches!(err, VersionError::InvalidOptions { .. }));
    }

    #[tokio::test]
    async fn pruning_keeps_shared_bodies() {
        let (store, _, manager) = manager();
        store.insert_noun("e", json!({"state": "a"}));
        manager.save("e", commit()).await.unwrap();
        store.insert_noun("e", json!({"state": "b"}));
        manager.save("e", commit()).await.unwrap();
        store.insert_noun("e", json!({"state": "a"}));
        manager.save("e", commit()).await.unwrap();

        manager
            .prune("e", PruneOptions::new().keep_recent(1))
            .await
            .unwrap();
        assert_eq!(manager.get_content("e", 3).await.unwrap(), json!({"state": "a"}));
    }

    #[tokio::test]
    async fn numbering_continues_after_pruning_the_middle() {
        let (store, _, manager) = saved(3).await;
        manager
            .prune("e", PruneOptions::new().keep_recent(1))
            .await
            .unwrap();
        store.insert_noun("e", json!({"n": 4}));
        assert_eq!(manager.save("e", commit()).await.unwrap().version, 4);
    }

    #[tokio::test]
    async fn derived_lookups_and_clear() {
        let (store, _, manager) = saved(3).await;
        assert!(manager.has_versions("e").await.unwrap());
        assert_eq!(manager.get_latest("e").await.unwrap().unwrap().version, 3);
        assert!(manager.get_version("e", 2).await.unwrap().is_some());

        assert_eq!(manager.index().cached_lists(), 1);
        assert_eq!(manager.clear("e").await.unwrap(), 3);
        assert_eq!(manager.index().cached_lists(), 0);
        assert!(!manager.has_versions("e").await.unwrap());
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn branches_are_numbered_independently() {
        let (store, _, manager) = saved(2).await;
        store.switch_branch("feature");
        store.insert_noun("e", json!({"n": "feature"}));
        let v = manager.save("e", commit()).await.unwrap();

        assert_eq!(v.version, 1);
        assert_eq!(v.branch, "feature");
        let main = manager
            .list("e", VersionQuery::new().branch("main"))
            .await
            .unwrap();
        assert_eq!(main.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_saves_never_share_a_number() {
        let (store, _, manager) = manager();
        let manager = Arc::new(manager);
        store.commit(CommitRequest::new("init")).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = Arc::clone(&store);
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                store.insert_noun("e", json!({"writer": n}));
                manager.save("e", SaveVersionOptions::new()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut numbers: Vec<u32> = manager
            .list("e", VersionQuery::new())
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        numbers.sort_unstable();
        let expected: Vec<u32> = (1..=numbers.len() as u32).collect();
        assert_eq!(numbers, expected);
    }

    /// Blob store whose index writes fail.
    struct IndexWriteFails(InMemoryStore);

    #[async_trait]
    impl BlobStore for IndexWriteFails {
        async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
            if key.starts_with(crate::INDEX_PREFIX) {
                return Err(StorageError::unavailable("index offline"));
            }
            self.0.put(key, data).await
        }

        async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn delete(&self, key: &str) -> StorageResult<bool> {
            self.0.delete(key).await
        }

        async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
            self.0.list(prefix).await
        }
    }

    #[tokio::test]
    async fn index_failure_releases_the_body() {
        let entities = Arc::new(InMemoryStore::new());
        entities.insert_noun("e", json!({"a": 1}));
        let blobs = Arc::new(IndexWriteFails(InMemoryStore::new()));
        let manager = VersionManager::new(entities, blobs.clone());

        let err = manager.save("e", commit()).await.unwrap_err();
        assert!(matches!(err, VersionError::Storage(_)));
        assert_eq!(blobs.0.blob_count(), 0);
    }

    #[tokio::test]
    async fn content_of_missing_version() {
        let (_, _, manager) = saved(1).await;
        let err = manager.get_content("e", 5).await.unwrap_err();
        assert!(matches!(err, VersionError::VersionNotFound { .. }));
        let _: Value = manager.get_content("e", 1).await.unwrap();
    }
}
