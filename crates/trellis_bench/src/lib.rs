//! Benchmark support for Trellis.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
