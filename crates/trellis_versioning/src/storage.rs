//! Content-addressed version bodies.
//!
//! Bodies are stored once per distinct content under
//! `versions/blobs/{hash}` as a blob record: the canonical CBOR bytes of
//! the body plus a reference count. Every version pointing at a blob holds
//! one reference, so deleting one version never breaks another that shares
//! its content.

use crate::error::{VersionError, VersionResult};
use crate::types::EntityVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use trellis_codec::{
    decode_record, encode_record, from_canonical_bytes, to_canonical_bytes, ContentHash,
};
use trellis_storage::BlobStore;

/// Key prefix of stored bodies.
pub const BLOB_PREFIX: &str = "versions/blobs/";

/// Persisted envelope of a version body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BlobRecord {
    /// Canonical CBOR of the body.
    #[serde(with = "byte_string")]
    body: Vec<u8>,
    /// Number of versions referencing the body.
    ref_count: u64,
}

/// Serializes `Vec<u8>` as a CBOR byte string rather than an array of ints.
mod byte_string {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

/// Stores and loads version bodies through a [`BlobStore`].
pub struct VersionStorage {
    blobs: Arc<dyn BlobStore>,
    // Reference counts are read-modify-write on the blob store.
    ref_lock: Mutex<()>,
}

impl VersionStorage {
    /// Creates storage over `blobs`.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            ref_lock: Mutex::new(()),
        }
    }

    /// Stores `body` and takes one reference on it.
    ///
    /// Returns the content hash the body is stored under.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be encoded or the blob store fails.
    pub async fn store(&self, body: &Value) -> VersionResult<ContentHash> {
        let bytes = to_canonical_bytes(body)?;
        let hash = ContentHash::of_bytes(&bytes);
        let key = blob_key(&hash);

        let _guard = self.ref_lock.lock().await;
        let record = match self.read_record(&key).await? {
            Some(mut existing) => {
                existing.ref_count += 1;
                existing
            }
            None => BlobRecord {
                body: bytes,
                ref_count: 1,
            },
        };
        self.blobs.put(&key, encode_record(&record)?).await?;
        debug!(hash = %hash, refs = record.ref_count, "stored version body");
        Ok(hash)
    }

    /// Loads the body stored under `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Corrupted`] if the body is missing or its
    /// bytes no longer hash to `hash`.
    pub async fn load(&self, hash: &ContentHash) -> VersionResult<Value> {
        let record = self
            .read_record(&blob_key(hash))
            .await?
            .ok_or_else(|| VersionError::corrupted(format!("body {hash} is missing")))?;

        let actual = ContentHash::of_bytes(&record.body);
        if &actual != hash {
            return Err(VersionError::corrupted(format!(
                "body {hash} hashes to {actual}"
            )));
        }
        Ok(from_canonical_bytes(&record.body)?)
    }

    /// Loads the body of `version`.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub async fn load_version(&self, version: &EntityVersion) -> VersionResult<Value> {
        self.load(&version.content_hash).await
    }

    /// Drops one reference on `hash`, deleting the body at zero.
    ///
    /// Returns true if the body was deleted. Releasing an unknown hash is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob store fails.
    pub async fn release(&self, hash: &ContentHash) -> VersionResult<bool> {
        let key = blob_key(hash);
        let _guard = self.ref_lock.lock().await;
        let Some(mut record) = self.read_record(&key).await? else {
            return Ok(false);
        };

        record.ref_count = record.ref_count.saturating_sub(1);
        if record.ref_count == 0 {
            self.blobs.delete(&key).await?;
            debug!(hash = %hash, "deleted version body");
            return Ok(true);
        }
        self.blobs.put(&key, encode_record(&record)?).await?;
        Ok(false)
    }

    /// Number of versions referencing `hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob store fails.
    pub async fn ref_count(&self, hash: &ContentHash) -> VersionResult<u64> {
        Ok(self
            .read_record(&blob_key(hash))
            .await?
            .map_or(0, |record| record.ref_count))
    }

    async fn read_record(&self, key: &str) -> VersionResult<Option<BlobRecord>> {
        match self.blobs.get(key).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for VersionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStorage").finish_non_exhaustive()
    }
}

fn blob_key(hash: &ContentHash) -> String {
    format!("{BLOB_PREFIX}{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_storage::InMemoryStore;

    fn storage() -> (Arc<InMemoryStore>, VersionStorage) {
        let store = Arc::new(InMemoryStore::new());
        let storage = VersionStorage::new(store.clone());
        (store, storage)
    }

    #[tokio::test]
    async fn store_and_load() {
        let (_, storage) = storage();
        let body = json!({"name": "alice", "tags": ["a", "b"], "score": 1.5});

        let hash = storage.store(&body).await.unwrap();
        assert_eq!(storage.load(&hash).await.unwrap(), body);
        assert_eq!(storage.ref_count(&hash).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn identical_bodies_share_one_blob() {
        let (store, storage) = storage();
        let a = storage.store(&json!({"x": 1, "y": 2})).await.unwrap();
        let b = storage.store(&json!({"y": 2, "x": 1})).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.blob_count(), 1);
        assert_eq!(storage.ref_count(&a).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn release_deletes_at_zero() {
        let (store, storage) = storage();
        let hash = storage.store(&json!({"x": 1})).await.unwrap();
        storage.store(&json!({"x": 1})).await.unwrap();

        assert!(!storage.release(&hash).await.unwrap());
        assert_eq!(storage.load(&hash).await.unwrap(), json!({"x": 1}));
        assert!(storage.release(&hash).await.unwrap());
        assert_eq!(store.blob_count(), 0);
        assert!(!storage.release(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn missing_body_is_corrupted() {
        let (_, storage) = storage();
        let err = storage
            .load(&ContentHash::from_hex("ab"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn tampered_body_is_detected() {
        let (store, storage) = storage();
        let hash = storage.store(&json!({"x": 1})).await.unwrap();

        let forged = BlobRecord {
            body: to_canonical_bytes(&json!({"x": 2})).unwrap(),
            ref_count: 1,
        };
        store
            .put(&blob_key(&hash), encode_record(&forged).unwrap())
            .await
            .unwrap();

        let err = storage.load(&hash).await.unwrap_err();
        assert!(matches!(err, VersionError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn garbage_envelope_is_a_codec_error() {
        let (store, storage) = storage();
        let hash = ContentHash::from_hex("cd");
        store.put(&blob_key(&hash), vec![0xff, 0x00]).await.unwrap();

        let err = storage.load(&hash).await.unwrap_err();
        assert!(matches!(err, VersionError::Codec(_)));
    }
}
