//! # Cache Provider
//!
//! This module defines the trait every cache partition implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

/// A single named partition that can store and retrieve responses
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Check if the partition contains an entry for the given key
    async fn contains(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Get an entry from the partition
    async fn get(&self, key: &CacheKey) -> CacheLookupResult;

    /// Put an entry into the partition, replacing any previous one
    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()>;

    /// Remove an entry from the partition
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Clear all entries from the partition
    async fn clear(&self) -> CacheResult<()>;

    /// List the keys currently stored
    async fn keys(&self) -> CacheResult<Vec<CacheKey>>;
}
