//! # Cache Storage
//!
//! The set of named partitions. Partitions are created on first open, listed
//! in creation order, and deleted wholesale when their name goes stale.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{fs, io};
use tracing::{debug, info, warn};

use crate::cache::providers::{CacheProvider, FileCache, MemoryCache};
use crate::cache::types::{CacheKey, CacheMetadata, CacheResult};

/// Where partitions keep their entries
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Volatile partitions, each bounded to `max_partition_bytes` (0 = unbounded)
    Memory { max_partition_bytes: u64 },
    /// One directory per partition below `root`
    Disk { root: PathBuf },
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Memory {
            max_partition_bytes: 0,
        }
    }
}

struct Partition {
    name: String,
    provider: Arc<dyn CacheProvider>,
}

/// Named cache set shared by the router, the prefetch pipeline and the
/// lifecycle controller
#[derive(Clone)]
pub struct CacheStorage {
    backend: StorageBackend,
    partitions: Arc<RwLock<Vec<Partition>>>,
}

impl CacheStorage {
    /// Open the storage. For a disk backend, partitions left by earlier runs
    /// are discovered so that activation can evict stale ones.
    pub async fn load(backend: StorageBackend) -> io::Result<Self> {
        let storage = Self {
            backend: backend.clone(),
            partitions: Arc::new(RwLock::new(Vec::new())),
        };

        if let StorageBackend::Disk { root } = &backend {
            fs::create_dir_all(root).await?;

            let mut found = Vec::new();
            let mut entries = fs::read_dir(root).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if is_valid_partition_name(name) {
                        found.push(name.to_string());
                    }
                }
            }
            // Directory order is arbitrary; make lookups deterministic
            found.sort();

            for name in found {
                debug!(partition = %name, "Discovered existing partition");
                storage.open(&name)?;
            }
        }

        Ok(storage)
    }

    /// Storage that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::default(),
            partitions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Open a partition, creating it if needed
    pub fn open(&self, name: &str) -> io::Result<Arc<dyn CacheProvider>> {
        if !is_valid_partition_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid partition name: {name:?}"),
            ));
        }

        if let Some(existing) = self.find(name) {
            return Ok(existing);
        }

        let mut partitions = self.partitions.write();
        // Another caller may have created it between the read and the write lock
        if let Some(p) = partitions.iter().find(|p| p.name == name) {
            return Ok(Arc::clone(&p.provider));
        }

        let provider: Arc<dyn CacheProvider> = match &self.backend {
            StorageBackend::Memory {
                max_partition_bytes,
            } => Arc::new(MemoryCache::new(*max_partition_bytes)),
            StorageBackend::Disk { root } => Arc::new(FileCache::new(root.join(name))),
        };

        partitions.push(Partition {
            name: name.to_string(),
            provider: Arc::clone(&provider),
        });
        debug!(partition = %name, "Opened partition");
        Ok(provider)
    }

    pub fn has(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Names of all partitions, in creation order
    pub fn keys(&self) -> Vec<String> {
        self.partitions.read().iter().map(|p| p.name.clone()).collect()
    }

    /// Delete a partition and everything in it. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> CacheResult<bool> {
        let removed = {
            let mut partitions = self.partitions.write();
            partitions
                .iter()
                .position(|p| p.name == name)
                .map(|idx| partitions.remove(idx))
        };

        let Some(partition) = removed else {
            return Ok(false);
        };

        partition.provider.clear().await?;
        if let StorageBackend::Disk { root } = &self.backend {
            match fs::remove_dir_all(root.join(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        info!(partition = %name, "Deleted partition");
        Ok(true)
    }

    /// Look the key up in every partition, in creation order
    pub async fn match_any(&self, key: &CacheKey) -> Option<(Bytes, CacheMetadata)> {
        let providers: Vec<(String, Arc<dyn CacheProvider>)> = self
            .partitions
            .read()
            .iter()
            .map(|p| (p.name.clone(), Arc::clone(&p.provider)))
            .collect();

        for (name, provider) in providers {
            match provider.get(key).await {
                Ok(Some(hit)) => return Some(hit),
                Ok(None) => {}
                Err(e) => {
                    warn!(partition = %name, url = %key.url, error = %e, "Cache lookup failed");
                }
            }
        }
        None
    }

    fn find(&self, name: &str) -> Option<Arc<dyn CacheProvider>> {
        self.partitions
            .read()
            .iter()
            .find(|p| p.name == name)
            .map(|p| Arc::clone(&p.provider))
    }
}

fn is_valid_partition_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
