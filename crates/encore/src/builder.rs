//! # Builder for WorkerConfig
//!
//! Fluent construction of [`WorkerConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use encore_engine::{SiteOrigin, WorkerConfig};
//!
//! let origin = SiteOrigin::parse("https://letter.example/").unwrap();
//! let config = WorkerConfig::builder(origin)
//!     .with_cache_version("v3")
//!     .with_media_prefix("assets/music/")
//!     .with_max_retries(3)
//!     .with_retry_delay(Duration::from_millis(250))
//!     .with_verbose(true)
//!     .build();
//!
//! assert_eq!(config.partitions().media, "media-v3");
//! ```

use std::time::Duration;

use crate::config::{HttpConfig, PrefetchConcurrency, RetryConfig, WorkerConfig};
use crate::net::SiteOrigin;

/// Builder for creating WorkerConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
    custom_media_prefixes: bool,
}

impl WorkerConfigBuilder {
    /// Start from the defaults for the given origin
    pub fn new(origin: SiteOrigin) -> Self {
        Self {
            config: WorkerConfig::new(origin),
            custom_media_prefixes: false,
        }
    }

    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.config.cache_version = version.into();
        self
    }

    /// Replace the shell URL list
    pub fn with_shell_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.shell_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Add a media path prefix. The first call replaces the defaults.
    pub fn with_media_prefix(mut self, prefix: impl Into<String>) -> Self {
        if !self.custom_media_prefixes {
            self.config.media_path_prefixes.clear();
            self.custom_media_prefixes = true;
        }
        self.config.media_path_prefixes.push(prefix.into());
        self
    }

    pub fn with_priority_media_count(mut self, count: usize) -> Self {
        self.config.priority_media_count = count;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay_base: Duration) -> Self {
        self.config.retry.delay_base = delay_base;
        self
    }

    pub fn with_concurrency(mut self, concurrency: PrefetchConcurrency) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_http_config(mut self, http: HttpConfig) -> Self {
        self.config.http = http;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.http.user_agent = user_agent.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.config
    }
}
