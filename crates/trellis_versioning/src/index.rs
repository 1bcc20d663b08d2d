//! Version metadata index.
//!
//! One record per version at
//! `versions/index/{entity}/{branch}/{version:010}`. The zero padding keeps
//! a prefix listing in version order. Record lists are cached per
//! (entity, branch) after the first read, up to a fixed number of lists;
//! the least recently used list is evicted first.

use crate::error::{VersionError, VersionResult};
use crate::types::{EntityVersion, VersionQuery};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use trellis_codec::{decode_record, encode_record};
use trellis_storage::BlobStore;

/// Key prefix of index records.
pub const INDEX_PREFIX: &str = "versions/index/";

/// Default number of (entity, branch) lists kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

type CacheKey = (String, String);

struct CachedList {
    records: Arc<Vec<EntityVersion>>,
    last_used: AtomicU64,
}

/// Queryable version metadata keyed by (entity, branch, version).
pub struct VersionIndex {
    blobs: Arc<dyn BlobStore>,
    cache: RwLock<HashMap<CacheKey, CachedList>>,
    capacity: usize,
    tick: AtomicU64,
    // Bumped on every mutation; a listing read from the store is only cached
    // if no mutation raced with it.
    generation: AtomicU64,
}

impl VersionIndex {
    /// Creates an index over `blobs`.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            cache: RwLock::new(HashMap::new()),
            capacity: DEFAULT_CACHE_CAPACITY,
            tick: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Sets how many (entity, branch) lists stay cached. Zero disables
    /// caching.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Persists a version record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub async fn add(&self, version: &EntityVersion) -> VersionResult<()> {
        let key = record_key(&version.entity_id, &version.branch, version.version);
        self.blobs.put(&key, encode_record(version)?).await?;
        self.generation.fetch_add(1, Ordering::AcqRel);

        let cache_key = (version.entity_id.clone(), version.branch.clone());
        if let Some(cached) = self.cache.write().get_mut(&cache_key) {
            let records = Arc::make_mut(&mut cached.records);
            records.retain(|v| v.version != version.version);
            let at = records.partition_point(|v| v.version < version.version);
            records.insert(at, version.clone());
        }
        Ok(())
    }

    /// Removes a version record. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob store fails.
    pub async fn remove(&self, entity_id: &str, branch: &str, version: u32) -> VersionResult<bool> {
        let removed = self
            .blobs
            .delete(&record_key(entity_id, branch, version))
            .await?;
        self.generation.fetch_add(1, Ordering::AcqRel);

        let cache_key = (entity_id.to_string(), branch.to_string());
        if let Some(cached) = self.cache.write().get_mut(&cache_key) {
            Arc::make_mut(&mut cached.records).retain(|v| v.version != version);
        }
        Ok(removed)
    }

    /// All versions of an entity on a branch, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read or decoded.
    pub async fn list_all(&self, entity_id: &str, branch: &str) -> VersionResult<Vec<EntityVersion>> {
        Ok(self.records(entity_id, branch).await?.as_ref().clone())
    }

    /// Number of versions of an entity on a branch.
    ///
    /// # Errors
    ///
    /// See [`list_all`](Self::list_all).
    pub async fn count(&self, entity_id: &str, branch: &str) -> VersionResult<usize> {
        Ok(self.records(entity_id, branch).await?.len())
    }

    /// Versions matching `query`, newest first.
    ///
    /// `query.branch` is ignored; the caller resolves it to `branch`.
    ///
    /// # Errors
    ///
    /// See [`list_all`](Self::list_all).
    pub async fn query(
        &self,
        entity_id: &str,
        branch: &str,
        query: &VersionQuery,
    ) -> VersionResult<Vec<EntityVersion>> {
        let records = self.records(entity_id, branch).await?;
        Ok(records
            .iter()
            .rev()
            .filter(|v| query.matches(v))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Looks up a version by number.
    ///
    /// # Errors
    ///
    /// See [`list_all`](Self::list_all).
    pub async fn get(
        &self,
        entity_id: &str,
        branch: &str,
        version: u32,
    ) -> VersionResult<Option<EntityVersion>> {
        let records = self.records(entity_id, branch).await?;
        Ok(records
            .binary_search_by_key(&version, |v| v.version)
            .ok()
            .map(|at| records[at].clone()))
    }

    /// Looks up the newest version carrying `tag`.
    ///
    /// # Errors
    ///
    /// See [`list_all`](Self::list_all).
    pub async fn get_by_tag(
        &self,
        entity_id: &str,
        branch: &str,
        tag: &str,
    ) -> VersionResult<Option<EntityVersion>> {
        let records = self.records(entity_id, branch).await?;
        Ok(records
            .iter()
            .rev()
            .find(|v| v.tag.as_deref() == Some(tag))
            .cloned())
    }

    /// The newest version.
    ///
    /// # Errors
    ///
    /// See [`list_all`](Self::list_all).
    pub async fn latest(&self, entity_id: &str, branch: &str) -> VersionResult<Option<EntityVersion>> {
        Ok(self.records(entity_id, branch).await?.last().cloned())
    }

    /// Drops the cached list of one (entity, branch).
    pub fn evict(&self, entity_id: &str, branch: &str) {
        self.cache
            .write()
            .remove(&(entity_id.to_string(), branch.to_string()));
    }

    /// Drops every cached record list.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Number of (entity, branch) lists currently cached.
    pub fn cached_lists(&self) -> usize {
        self.cache.read().len()
    }

    async fn records(&self, entity_id: &str, branch: &str) -> VersionResult<Arc<Vec<EntityVersion>>> {
        let cache_key = (entity_id.to_string(), branch.to_string());
        if let Some(cached) = self.cache.read().get(&cache_key) {
            cached.last_used.store(self.next_tick(), Ordering::Relaxed);
            return Ok(Arc::clone(&cached.records));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let prefix = entity_prefix(entity_id, branch);
        let mut records = Vec::new();
        for key in self.blobs.list(&prefix).await? {
            // Listed keys can vanish under a concurrent prune.
            let Some(bytes) = self.blobs.get(&key).await? else {
                continue;
            };
            let record: EntityVersion = decode_record(&bytes)?;
            if record.entity_id != entity_id || record.branch != branch {
                return Err(VersionError::corrupted(format!(
                    "record {key} belongs to {}/{}",
                    record.entity_id, record.branch
                )));
            }
            records.push(record);
        }
        records.sort_by_key(|v| v.version);
        let records = Arc::new(records);

        if self.capacity == 0 {
            return Ok(records);
        }
        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) == generation {
            if cache.len() >= self.capacity && !cache.contains_key(&cache_key) {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, cached)| cached.last_used.load(Ordering::Relaxed))
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
            cache.insert(
                cache_key,
                CachedList {
                    records: Arc::clone(&records),
                    last_used: AtomicU64::new(self.next_tick()),
                },
            );
        }
        Ok(records)
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for VersionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionIndex")
            .field("cached", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

/// Escapes a key segment so it cannot contain `/`.
fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

fn entity_prefix(entity_id: &str, branch: &str) -> String {
    format!(
        "{INDEX_PREFIX}{}/{}/",
        escape_segment(entity_id),
        escape_segment(branch)
    )
}

fn record_key(entity_id: &str, branch: &str, version: u32) -> String {
    format!("{}{version:010}", entity_prefix(entity_id, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_codec::ContentHash;
    use trellis_storage::InMemoryStore;

    fn version(entity: &str, branch: &str, n: u32, timestamp: u64, tag: Option<&str>) -> EntityVersion {
        EntityVersion {
            version: n,
            entity_id: entity.into(),
            branch: branch.into(),
            commit_hash: format!("c{n}"),
            timestamp,
            tag: tag.map(String::from),
            description: None,
            content_hash: ContentHash::from_hex(format!("{n:02x}")),
            author: None,
            metadata: None,
        }
    }

    async fn populated() -> (Arc<InMemoryStore>, VersionIndex) {
        let store = Arc::new(InMemoryStore::new());
        let index = VersionIndex::new(store.clone());
        for n in 1..=5 {
            let tag = (n == 2).then_some("milestone");
            index.add(&version("e", "main", n, n as u64 * 100, tag)).await.unwrap();
        }
        (store, index)
    }

    #[test]
    fn keys_escape_separators() {
        assert_eq!(escape_segment("a/b%c"), "a%2Fb%25c");
        assert_eq!(
            record_key("users/1", "main", 7),
            "versions/index/users%2F1/main/0000000007"
        );
    }

    #[tokio::test]
    async fn list_is_ordered_and_cached() {
        let (store, index) = populated().await;
        let all = index.list_all("e", "main").await.unwrap();
        assert_eq!(all.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        // A fresh index reads the same records back from the store.
        let fresh = VersionIndex::new(store);
        assert_eq!(fresh.list_all("e", "main").await.unwrap(), all);
    }

    #[tokio::test]
    async fn query_filters_newest_first() {
        let (_, index) = populated().await;

        let page = index
            .query("e", "main", &VersionQuery::new().offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.iter().map(|v| v.version).collect::<Vec<_>>(), vec![4, 3]);

        let ranged = index
            .query("e", "main", &VersionQuery::new().time_range(Some(200), Some(300)))
            .await
            .unwrap();
        assert_eq!(ranged.iter().map(|v| v.version).collect::<Vec<_>>(), vec![3, 2]);

        let tagged = index
            .query("e", "main", &VersionQuery::new().tag("milestone"))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].version, 2);
    }

    #[tokio::test]
    async fn point_lookups() {
        let (_, index) = populated().await;
        assert_eq!(index.get("e", "main", 3).await.unwrap().unwrap().version, 3);
        assert!(index.get("e", "main", 9).await.unwrap().is_none());
        assert_eq!(
            index.get_by_tag("e", "main", "milestone").await.unwrap().unwrap().version,
            2
        );
        assert_eq!(index.latest("e", "main").await.unwrap().unwrap().version, 5);
        assert!(index.latest("other", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_updates_store_and_cache() {
        let (store, index) = populated().await;
        index.list_all("e", "main").await.unwrap();

        assert!(index.remove("e", "main", 3).await.unwrap());
        assert!(!index.remove("e", "main", 3).await.unwrap());
        assert!(index.get("e", "main", 3).await.unwrap().is_none());

        let fresh = VersionIndex::new(store);
        assert_eq!(fresh.list_all("e", "main").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn branches_and_prefixes_are_isolated() {
        let store = Arc::new(InMemoryStore::new());
        let index = VersionIndex::new(store);
        index.add(&version("e", "main", 1, 0, None)).await.unwrap();
        index.add(&version("e", "dev", 1, 0, None)).await.unwrap();
        index.add(&version("e2", "main", 1, 0, None)).await.unwrap();

        assert_eq!(index.list_all("e", "main").await.unwrap().len(), 1);
        assert_eq!(index.list_all("e", "dev").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cache_is_bounded_and_evicts_least_recently_used() {
        let store = Arc::new(InMemoryStore::new());
        let index = VersionIndex::new(store).cache_capacity(2);
        for entity in ["a", "b", "c"] {
            index.add(&version(entity, "main", 1, 0, None)).await.unwrap();
        }

        index.latest("a", "main").await.unwrap();
        index.latest("b", "main").await.unwrap();
        // Touch "a" so "b" becomes the eviction candidate.
        index.latest("a", "main").await.unwrap();
        index.latest("c", "main").await.unwrap();
        assert_eq!(index.cached_lists(), 2);

        let cache = index.cache.read();
        assert!(cache.contains_key(&("a".to_string(), "main".to_string())));
        assert!(!cache.contains_key(&("b".to_string(), "main".to_string())));
        assert!(cache.contains_key(&("c".to_string(), "main".to_string())));
    }

    #[tokio::test]
    async fn evicted_lists_are_reloaded_from_the_store() {
        let (_, index) = populated().await;
        index.list_all("e", "main").await.unwrap();
        assert_eq!(index.cached_lists(), 1);

        index.evict("e", "main");
        assert_eq!(index.cached_lists(), 0);
        assert_eq!(index.count("e", "main").await.unwrap(), 5);
        assert_eq!(index.cached_lists(), 1);
    }

    #[tokio::test]
    async fn zero_capacity_disables_caching() {
        let store = Arc::new(InMemoryStore::new());
        let index = VersionIndex::new(store).cache_capacity(0);
        index.add(&version("e", "main", 1, 0, None)).await.unwrap();
        assert_eq!(index.latest("e", "main").await.unwrap().unwrap().version, 1);
        assert_eq!(index.cached_lists(), 0);
    }
}
