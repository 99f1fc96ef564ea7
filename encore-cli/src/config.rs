use encore_engine::{SiteOrigin, WorkerConfig, WorkerConfigBuilder};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};

/// Settings read from the optional TOML file. Every field may be left out;
/// command-line flags win over the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Site origin
    pub origin: Option<String>,

    /// Directory holding cache partitions and the state database
    pub cache_dir: Option<PathBuf>,

    /// Keep the preferred track in memory only
    pub no_persist: bool,

    /// Partition name suffix
    pub cache_version: Option<String>,

    /// Shell URLs seeded at install
    pub shell_urls: Option<Vec<String>>,

    /// Path prefixes identifying audio assets
    pub media_prefixes: Option<Vec<String>>,

    /// Media entries fetched ahead of the rest
    pub priority_media_count: Option<usize>,

    /// Retries per background asset
    pub max_retries: Option<u32>,

    /// Base delay between retries, in milliseconds
    pub retry_delay_ms: Option<u64>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    pub user_agent: Option<String>,

    /// Default listen address for `serve`
    pub listen: Option<SocketAddr>,
}

impl AppConfig {
    /// Load the configuration file. A missing path yields the defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                let config = toml::from_str(&content)?;
                debug!(path = %path.display(), "Loaded configuration file");
                Ok(config)
            }
            Some(path) => {
                debug!(path = %path.display(), "Configuration file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides
    pub fn merge_flags(
        mut self,
        origin: Option<String>,
        cache_dir: Option<PathBuf>,
        no_persist: bool,
    ) -> Self {
        if origin.is_some() {
            self.origin = origin;
        }
        if cache_dir.is_some() {
            self.cache_dir = cache_dir;
        }
        self.no_persist |= no_persist;
        self
    }

    pub fn site_origin(&self) -> Result<SiteOrigin> {
        let origin = self.origin.as_deref().ok_or_else(|| {
            AppError::InvalidInput("no site origin given (use --origin or the config file)".into())
        })?;
        Ok(SiteOrigin::parse(origin)?)
    }

    pub fn worker_config(&self, verbose: bool) -> Result<WorkerConfig> {
        let mut builder = WorkerConfigBuilder::new(self.site_origin()?).with_verbose(verbose);

        if let Some(version) = &self.cache_version {
            builder = builder.with_cache_version(version);
        }
        if let Some(urls) = &self.shell_urls {
            builder = builder.with_shell_urls(urls);
        }
        if let Some(prefixes) = &self.media_prefixes {
            for prefix in prefixes {
                builder = builder.with_media_prefix(prefix);
            }
        }
        if let Some(count) = self.priority_media_count {
            builder = builder.with_priority_media_count(count);
        }
        if let Some(retries) = self.max_retries {
            builder = builder.with_max_retries(retries);
        }
        if let Some(ms) = self.retry_delay_ms {
            builder = builder.with_retry_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.with_timeout(Duration::from_secs(secs));
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.with_user_agent(user_agent);
        }

        Ok(builder.build())
    }
}
