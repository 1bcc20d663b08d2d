//! # Trellis Storage
//!
//! Collaborator contracts for the Trellis consistency core.
//!
//! The core drives storage, the vector index, the metadata index and the
//! host entity store without knowing how any of them are implemented. This
//! crate defines those contracts as narrow async capability traits, plus the
//! soft-delete convention shared by writers and the cleanup pass.
//!
//! ## Design Principles
//!
//! - One trait per capability, so tests can substitute each independently
//! - Traits are object safe and `Send + Sync` (`Arc<dyn NounStore>`)
//! - Storage is the durability source of truth; indexes are derived
//!
//! ## Available Implementations
//!
//! - [`InMemoryStore`] - noun store, entity store and blob store
//! - [`InMemoryVectorIndex`] - vector index membership
//! - [`InMemoryMetadataIndex`] - metadata index entries

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod types;

pub use backend::{BlobStore, EntityStore, IndexRemover, NounStore, VectorRemover};
pub use error::{StorageError, StorageResult};
pub use memory::{
    CommitRecord, InMemoryMetadataIndex, InMemoryStore, InMemoryVectorIndex, DEFAULT_BRANCH,
};
pub use types::{
    deleted_at, is_soft_deleted, mark_soft_deleted, CommitRef, CommitRequest, Noun, NounPage,
    Pagination, DELETED_FIELD, UPDATED_AT_FIELD,
};
