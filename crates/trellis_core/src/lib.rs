//! # Trellis Core
//!
//! Storage-consistency core for Trellis.
//!
//! This crate provides:
//! - [`WriteBuffer`]: deduplicating, batching writes per category, with a
//!   [`WriteBufferRegistry`] owning one buffer per category
//! - [`BackpressureController`]: priority admission shared by every flush
//! - [`PeriodicCleanup`]: scheduled purge of expired soft-deleted nouns from
//!   storage and both indexes
//! - [`CoreContext`]: the shared controller and clock these are built from
//!
//! ## Ordering Guarantees
//!
//! - Within one buffer at most one flush is in flight
//! - Writes to the same id before a flush collapse to the last value
//! - Cleanup passes never overlap
//! - Cleanup deletes from storage, then the vector index, then the metadata index
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use serde_json::Value;
//! use trellis_core::{CoreContext, CoreError, FnWriter, WriteBufferConfig};
//!
//! # async fn run() -> Result<(), CoreError> {
//! let ctx = CoreContext::default();
//! let buffers = ctx.write_buffers::<Value>(WriteBufferConfig::default())?;
//!
//! let writer = Arc::new(FnWriter::new(|batch: HashMap<String, Value>| async move {
//!     println!("writing {} nouns", batch.len());
//!     Ok::<(), CoreError>(())
//! }));
//! let nouns = buffers.get_or_create("nouns", writer);
//! nouns.add("n-1", Value::Null).await;
//!
//! buffers.stop_all().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backpressure;
mod cleanup;
mod clock;
mod config;
mod context;
mod error;
mod scheduler;
mod stats;
mod write_buffer;

pub use backpressure::{BackpressureController, BackpressureStatus, Priority};
pub use cleanup::{CleanupReport, CleanupState, ConsistencyWarning, IndexKind, PeriodicCleanup};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackpressureConfig, CleanupConfig, LoadTier, WriteBufferConfig, MAX_FLUSH_BATCH};
pub use context::CoreContext;
pub use error::{CoreError, CoreResult};
pub use scheduler::{CancelToken, Ticker};
pub use stats::{CleanupStats, CleanupStatsSnapshot, WriteBufferStats, WriteBufferStatsSnapshot};
pub use write_buffer::{
    BufferedWrite, BulkWriter, FlushReason, FlushResult, FnWriter, WriteBuffer,
    WriteBufferRegistry, WriteState,
};
