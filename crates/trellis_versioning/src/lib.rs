//! # Trellis Versioning
//!
//! Point-in-time versions of individual entities.
//!
//! A version is a metadata record ([`EntityVersion`]) plus a body stored by
//! content hash. Saving unchanged content is a no-op, identical bodies are
//! stored once, and every version is anchored to a host commit so it can be
//! related to the dataset snapshot it was taken from.
//!
//! ## Components
//!
//! - [`VersionManager`] - save, list, restore, compare and prune
//! - [`VersionStorage`] - reference-counted, content-addressed bodies
//! - [`VersionIndex`] - per-(entity, branch) metadata records
//! - [`VersionDiff`] - structural comparison with dotted paths
//!
//! ## Storage Layout
//!
//! Everything lives in a [`BlobStore`](trellis_storage::BlobStore):
//!
//! ```text
//! versions/blobs/{sha256}                          canonical body + refcount
//! versions/index/{entity}/{branch}/{0000000001}    EntityVersion record
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
mod index;
mod manager;
mod storage;
mod types;

pub use diff::{DiffOptions, DiffResult, FieldChange, VersionDiff, ROOT_PATH};
pub use error::{VersionError, VersionResult};
pub use index::{VersionIndex, DEFAULT_CACHE_CAPACITY, INDEX_PREFIX};
pub use manager::VersionManager;
pub use storage::{VersionStorage, BLOB_PREFIX};
pub use types::{
    EntityVersion, PruneOptions, PruneResult, RestoreOptions, SaveVersionOptions, VersionQuery,
    VersionRef, BEFORE_RESTORE_TAG,
};
