//! Deterministic, pure logic shared by the bridge.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests. Where a decision
//! needs remote data (image downloads), the fetch is passed in as a closure.

pub mod classifier;
pub mod decoder;
pub mod filter;
pub mod path;
pub mod render;
pub mod types;
