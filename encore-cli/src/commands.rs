use encore_engine::{
    AssetWorker, CacheStorage, Fetcher, HttpFetcher, KeyValueStore, MemoryStore,
    PREFERRED_MEDIA_KEY, SqliteStore, StorageBackend, WorkerMessage,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::server;

const PARTITIONS_DIR: &str = "partitions";
const STATE_DB: &str = "state.db";
const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

/// Manifest file contents: a bare list or an object with an `assets` key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<String>),
    Object { assets: Vec<String> },
}

impl ManifestFile {
    fn into_assets(self) -> Vec<String> {
        match self {
            ManifestFile::List(assets) | ManifestFile::Object { assets } => assets,
        }
    }
}

pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let manifest: ManifestFile = serde_json::from_str(&content)?;
    Ok(manifest.into_assets())
}

pub struct CommandExecutor {
    config: AppConfig,
    verbose: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, verbose: bool) -> Self {
        Self { config, verbose }
    }

    async fn storage(&self) -> Result<CacheStorage> {
        match &self.config.cache_dir {
            Some(dir) => Ok(CacheStorage::load(StorageBackend::Disk {
                root: dir.join(PARTITIONS_DIR),
            })
            .await?),
            None => Ok(CacheStorage::in_memory()),
        }
    }

    fn key_value_store(&self) -> Arc<dyn KeyValueStore> {
        match (&self.config.cache_dir, self.config.no_persist) {
            (Some(dir), false) => Arc::new(SqliteStore::new(dir.join(STATE_DB))),
            _ => Arc::new(MemoryStore::new()),
        }
    }

    /// Build the worker together with the HTTP client it fetches through
    async fn build_worker(&self) -> Result<(AssetWorker, HttpFetcher)> {
        let worker_config = self.config.worker_config(self.verbose)?;
        let fetcher = HttpFetcher::new(&worker_config.http)?;
        let storage = self.storage().await?;
        let kv = self.key_value_store();

        let shared: Arc<dyn Fetcher> = Arc::new(fetcher.clone());
        let worker = AssetWorker::new(worker_config, shared, storage, kv);
        Ok((worker, fetcher))
    }

    async fn start(&self, worker: &AssetWorker) {
        let shell = worker.install().await;
        let evicted = worker.activate().await;
        info!(
            shell,
            evicted = evicted.len(),
            origin = %worker.config().origin.url(),
            "Worker ready"
        );
    }

    pub async fn warm(&self, manifest: &Path, preferred: Option<&str>) -> Result<()> {
        let assets = read_manifest(manifest)?;
        if self.config.cache_dir.is_none() {
            warn!("No --cache-dir given, the warmed cache is discarded on exit");
        }

        let (worker, _) = self.build_worker().await?;
        self.start(&worker).await;

        if let Some(url) = preferred {
            worker
                .handle_message(WorkerMessage::SetPreferredMedia {
                    url: url.to_owned(),
                })
                .await;
        }

        let report = worker
            .handle_message(WorkerMessage::PrefetchManifest { assets })
            .await
            .unwrap_or_default();
        worker.flush_background().await;

        println!(
            "Prefetch finished: {} cached, {} failed, {} skipped",
            report.cached, report.failed, report.skipped
        );
        self.print_partitions(worker.storage()).await;
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        let Some(dir) = &self.config.cache_dir else {
            return Err(AppError::InvalidInput(
                "status needs --cache-dir (or cache_dir in the config file)".into(),
            ));
        };

        let storage = self.storage().await?;
        println!("Cache directory: {}", dir.display());
        self.print_partitions(&storage).await;

        let preferred = self.key_value_store().get(PREFERRED_MEDIA_KEY).await;
        println!(
            "Preferred track: {}",
            preferred.as_deref().unwrap_or("(none)")
        );
        Ok(())
    }

    pub async fn serve(&self, listen: SocketAddr) -> Result<()> {
        let (worker, fetcher) = self.build_worker().await?;
        self.start(&worker).await;

        let worker = Arc::new(worker);
        server::run(Arc::clone(&worker), fetcher.client().clone(), listen).await?;

        worker.supersede();
        worker.flush_background().await;
        info!("Background commits flushed");
        Ok(())
    }

    async fn print_partitions(&self, storage: &CacheStorage) {
        let names = storage.keys();
        if names.is_empty() {
            println!("No cache partitions");
            return;
        }

        for name in names {
            let count = match storage.open(&name) {
                Ok(partition) => match partition.keys().await {
                    Ok(keys) => keys.len().to_string(),
                    Err(e) => format!("unreadable ({e})"),
                },
                Err(e) => format!("unavailable ({e})"),
            };
            println!("  {name:<16} {count}");
        }
    }

    /// Listen address: the flag, then the config file, then the default
    pub fn listen_address(&self, flag: Option<SocketAddr>) -> SocketAddr {
        flag.or(self.config.listen).unwrap_or(DEFAULT_LISTEN)
    }
}
