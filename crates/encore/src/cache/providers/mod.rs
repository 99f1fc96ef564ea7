//! # Partition Providers
//!
//! Storage behind a single named partition: volatile (moka) or on disk.

pub mod file;
pub mod memory;
pub mod provider;

pub use self::file::FileCache;
pub use self::memory::MemoryCache;
pub use self::provider::CacheProvider;
