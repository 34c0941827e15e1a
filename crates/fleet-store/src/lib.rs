//! # Fleet Store - Persisted State
//!
//! **Purpose**: An in-process implementation of the persisted-state contract
//! from `fleet-core`, used for development, the operator CLI and tests.
//!
//! Provides transactional inserts and deletes, snapshot reads, and the
//! `(host, kind, value)` uniqueness constraint on identifier bindings,
//! re-validated at commit so concurrent allocators cannot both win.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod memory;
mod tables;

pub use memory::{MemorySnapshot, MemoryStore, MemoryTransaction};
