//! # Memory Cache Provider
//!
//! This module provides an in-memory partition implementation using Moka.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

/// Entry in the memory cache
#[derive(Clone)]
struct CacheEntry {
    /// Cached data bytes
    data: Bytes,
    /// Metadata for the cached content
    metadata: CacheMetadata,
}

/// Memory cache provider implementation using Moka
#[derive(Clone)]
pub struct MemoryCache {
    /// Moka cache for storing entries
    cache: MokaCache<CacheKey, CacheEntry>,
    /// Maximum size for this cache in bytes, zero when unbounded
    max_size: u64,
}

impl MemoryCache {
    /// Create a new memory cache. A `max_size_bytes` of zero means the
    /// partition is never size-evicted.
    pub fn new(max_size_bytes: u64) -> Self {
        let mut builder = MokaCache::builder()
            .weigher(|_k, v: &CacheEntry| v.data.len().try_into().unwrap_or(u32::MAX));

        // Size based eviction
        if max_size_bytes > 0 {
            builder = builder.max_capacity(max_size_bytes);
        }

        let cache = builder.build();

        debug!(max_size = max_size_bytes, "Memory cache created");

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }

    /// Unbounded partition
    pub fn unbounded() -> Self {
        Self::new(0)
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    async fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|entry| (entry.data, entry.metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        let size = data.len() as u64;

        // A single entry shouldn't be larger than the total cache size
        if self.max_size > 0 && size > self.max_size {
            warn!(
                key = ?key,
                size = size,
                max_size = self.max_size,
                "Entry too large for memory cache, skipping"
            );
            return Ok(());
        }

        self.cache.insert(key, CacheEntry { data, metadata }).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        if self.cache.remove(key).await.is_some() {
            debug!(key = ?key, "Removed entry from memory cache");
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;

        debug!("Memory cache cleared");
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        self.cache.run_pending_tasks().await;
        Ok(self.cache.iter().map(|(k, _)| (*k).clone()).collect())
    }
}
