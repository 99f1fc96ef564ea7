//! # Key-Value Store
//!
//! Durable storage for small values that must survive worker restarts. The
//! only value the worker keeps here is the preferred media URL.
//!
//! Persistence is best effort: operations never return errors. Failures are
//! logged and resolve to `None` / `false`, and callers carry on with their
//! in-memory state.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

/// Key under which the preferred media URL is persisted
pub const PREFERRED_MEDIA_KEY: &str = "preferred-media";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value for `key`, or `None` when absent or unreadable
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`. Returns whether the write was committed.
    async fn set(&self, key: &str, value: &str) -> bool;

    /// Remove `key`. Returns whether the delete was committed; deleting a
    /// missing key succeeds.
    async fn delete(&self, key: &str) -> bool;
}
