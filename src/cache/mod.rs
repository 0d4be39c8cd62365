//! Versioned cache generations keyed by request.
//!
//! This module provides the host cache store the agent works against:
//! - Named generations, created on open and removed by name
//! - A persisted lifecycle status per generation (opened, installed, activated)
//! - Entries keyed by request method + URL, last write wins
//! - A persistent SQLite backend and an in-process backend

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStore;
pub use storage::SqliteStore;
pub use traits::{CacheStore, GenerationStatus};
