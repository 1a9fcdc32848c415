//! Local persistence and time-to-live caching.
//!
//! This module provides a GitHub-agnostic storage and caching mechanism that:
//! - Persists JSON values under string keys (SQLite or in-memory)
//! - Serves stored list snapshots until they outlive a configurable TTL
//! - Treats malformed stored values as absent rather than failing

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, DEFAULT_TTL_MINUTES};
pub use storage::{JsonStore, KeyValueStore, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
