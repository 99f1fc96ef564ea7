//! # File Cache
//!
//! A partition persisted as a directory: one `<hash>.body` file and one
//! `<hash>.meta` JSON file per entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

use super::CacheProvider;

const BODY_EXTENSION: &str = "body";
const META_EXTENSION: &str = "meta";

/// On-disk form of an entry's metadata file
#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    key: CacheKey,
    metadata: CacheMetadata,
}

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    initialized: Arc<AtomicBool>,
    temp_counter: Arc<AtomicU64>,
}

impl FileCache {
    /// Create a new file cache rooted at the specified directory
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            initialized: Arc::new(AtomicBool::new(false)),
            temp_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Initialize the partition directory
    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        // Fast path - already initialized
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        // Creating an existing directory is fine, so racing initializers are harmless
        fs::create_dir_all(&self.cache_dir).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn get_cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(key.to_filename())
            .with_extension(BODY_EXTENSION)
    }

    fn get_metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(key.to_filename())
            .with_extension(META_EXTENSION)
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        target.with_extension(format!("tmp{n}"))
    }

    async fn read_meta(path: &Path) -> Option<StoredMeta> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = ?path, error = %e, "Failed to read cache metadata file");
                }
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to parse cache metadata");
                None
            }
        }
    }

    async fn remove_pair(data_path: PathBuf, meta_path: PathBuf) {
        let _ = fs::remove_file(&data_path).await;
        let _ = fs::remove_file(&meta_path).await;
    }
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    async fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        self.ensure_initialized().await?;

        let data_exists = fs::try_exists(self.get_cache_path(key)).await?;
        let meta_exists = fs::try_exists(self.get_metadata_path(key)).await?;

        Ok(data_exists && meta_exists)
    }

    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        self.ensure_initialized().await?;

        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        let stored = match Self::read_meta(&meta_path).await {
            Some(stored) if stored.key == *key => stored,
            Some(_) => {
                warn!(path = ?meta_path, "Cache metadata belongs to another key");
                return Ok(None);
            }
            None => {
                // Unreadable or torn entry, drop it in the background
                if fs::try_exists(&meta_path).await.unwrap_or(false) {
                    tokio::spawn(Self::remove_pair(data_path, meta_path));
                }
                return Ok(None);
            }
        };

        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = ?data_path, error = %e, "Failed to read cache data file");
                }
                return Ok(None);
            }
        };

        Ok(Some((Bytes::from(data), stored.metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let data_path = self.get_cache_path(&key);
        let meta_path = self.get_metadata_path(&key);

        let stored = StoredMeta { key, metadata };
        let metadata_json = serde_json::to_vec(&stored).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize metadata: {e}"),
            )
        })?;

        // Write to temporary files first, then rename into place
        let temp_data_path = self.temp_path(&data_path);
        let temp_meta_path = self.temp_path(&meta_path);

        if let Err(e) = fs::write(&temp_data_path, &data).await {
            warn!(path = ?temp_data_path, error = %e, "Failed to write cache data file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "Failed to write cache metadata file");
            Self::remove_pair(temp_data_path, temp_meta_path).await;
            return Err(e);
        }

        // Data first: a body without metadata is never reported as present
        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(
                from = ?temp_data_path,
                to = ?data_path,
                error = %e,
                "Failed to rename temporary data file"
            );
            Self::remove_pair(temp_data_path, temp_meta_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_meta_path, &meta_path).await {
            warn!(
                from = ?temp_meta_path,
                to = ?meta_path,
                error = %e,
                "Failed to rename temporary metadata file"
            );
            Self::remove_pair(data_path, temp_meta_path).await;
            return Err(e);
        }

        debug!(key = ?stored.key, "Cached entry to file");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        // Missing files are fine
        let meta_result = fs::remove_file(&meta_path).await;
        let data_result = fs::remove_file(&data_path).await;

        match (meta_result, data_result) {
            (Err(e), _) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?meta_path, error = %e, "Failed to remove cache metadata file");
                Err(e)
            }
            (_, Err(e)) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?data_path, error = %e, "Failed to remove cache data file");
                Err(e)
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        let mut entry_count = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove cache file");
            } else {
                entry_count += 1;
            }
        }

        debug!(count = entry_count, dir = ?self.cache_dir, "Cleared cache files");
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        self.ensure_initialized().await?;

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
                continue;
            }
            if !fs::try_exists(path.with_extension(BODY_EXTENSION))
                .await
                .unwrap_or(false)
            {
                continue;
            }
            if let Some(stored) = Self::read_meta(&path).await {
                keys.push(stored.key);
            }
        }

        Ok(keys)
    }
}
