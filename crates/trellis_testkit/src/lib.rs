//! # Trellis Testkit
//!
//! Test utilities for Trellis.
//!
//! This crate provides:
//! - Failure-injecting collaborators that record call order
//! - Property-based test generators using proptest
//! - Stress runs for the write path
//! - One-shot tracing setup for tests
//!
//! Cross-crate scenario and property tests live in this crate's `tests/`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trellis_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn cleanup_survives_index_failures() {
//!     init_tracing();
//!     let fixture = CleanupFixture::new();
//!     fixture.insert_deleted("n-1", 0);
//!     fixture.vectors.fail_on("n-1");
//!     // ... run a cleanup pass against fixture.store / vectors / metadata
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::init_tracing;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::init_tracing;
pub use stress::*;
