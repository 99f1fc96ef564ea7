//! # Cache System
//!
//! Named, independently versioned cache partitions. Each partition maps a
//! request identity (method + absolute URL) to the last response stored for
//! it. A [`CacheStorage`] owns the partitions the way the browser's cache
//! storage owns named caches.

mod manager;
pub mod providers;
mod types;

pub use manager::{CacheStorage, StorageBackend};
pub use types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

pub use providers::{CacheProvider, FileCache, MemoryCache};
