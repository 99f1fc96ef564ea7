use std::time::Duration;

use crate::net::SiteOrigin;

const DEFAULT_USER_AGENT: &str = concat!("encore/", env!("CARGO_PKG_VERSION"));

/// Configuration for an [`AssetWorker`](crate::AssetWorker)
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin the site is served from
    pub origin: SiteOrigin,

    /// Suffix of every partition name. Bumping it evicts the previous
    /// deployment's partitions on activation.
    pub cache_version: String,

    /// Application shell seeded at install
    pub shell_urls: Vec<String>,

    /// Site-relative path prefixes identifying audio assets
    pub media_path_prefixes: Vec<String>,

    /// Number of manifest media entries fetched ahead of the rest
    pub priority_media_count: usize,

    pub retry: RetryConfig,

    pub concurrency: PrefetchConcurrency,

    pub http: HttpConfig,

    /// Broadcast `debug` diagnostics to clients
    pub verbose: bool,

    /// Capacity of the client broadcast channel
    pub event_capacity: usize,
}

impl WorkerConfig {
    /// Defaults for the given origin
    pub fn new(origin: SiteOrigin) -> Self {
        Self {
            origin,
            cache_version: "v1".to_owned(),
            shell_urls: [
                "/",
                "index.html",
                "player.html",
                "styles.css",
                "letter-styles.css",
                "letter.js",
                "player.js",
                // Critical assets, fetched with the shell
                "assets/images/background.png",
                "assets/images/landscape.jpg",
                "assets/music/chikwere.mp3",
                "assets/images/4.jpg",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            media_path_prefixes: vec!["assets/music/".to_owned(), "assets/media/".to_owned()],
            priority_media_count: 2,
            retry: RetryConfig::default(),
            concurrency: PrefetchConcurrency::default(),
            http: HttpConfig::default(),
            verbose: false,
            event_capacity: 64,
        }
    }

    pub fn builder(origin: SiteOrigin) -> crate::builder::WorkerConfigBuilder {
        crate::builder::WorkerConfigBuilder::new(origin)
    }

    /// Names of the four partitions for the configured version
    pub fn partitions(&self) -> PartitionSet {
        PartitionSet::for_version(&self.cache_version)
    }

    /// Whether a site-relative path names an audio asset
    pub fn is_media_path(&self, relative: &str) -> bool {
        self.media_path_prefixes
            .iter()
            .any(|prefix| relative.starts_with(prefix.trim_start_matches('/')))
    }
}

/// The current partition names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    pub shell: String,
    pub runtime: String,
    pub background: String,
    pub media: String,
}

impl PartitionSet {
    pub fn for_version(version: &str) -> Self {
        Self {
            shell: format!("shell-{version}"),
            runtime: format!("runtime-{version}"),
            background: format!("background-{version}"),
            media: format!("media-{version}"),
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [&self.shell, &self.runtime, &self.background, &self.media]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

// --- Retry Configuration ---
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries for background prefetch of a single asset
    pub max_retries: u32,
    /// Retries when seeding the shell at install
    pub install_retries: u32,
    /// Retries for the preferred track
    pub preferred_retries: u32,
    /// Base for exponential backoff
    pub delay_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            install_retries: 0,
            preferred_retries: 3,
            delay_base: Duration::from_millis(500),
        }
    }
}

// --- Prefetch Concurrency ---
#[derive(Debug, Clone)]
pub struct PrefetchConcurrency {
    /// Images and decorative video
    pub background: usize,
    /// Preferred track and the first manifest tracks
    pub priority: usize,
    /// Remaining tracks
    pub remainder: usize,
}

impl Default for PrefetchConcurrency {
    fn default() -> Self {
        Self {
            background: 4,
            priority: 3,
            remainder: 2,
        }
    }
}

// --- HTTP Configuration ---
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for a request, zero for none
    pub timeout: Duration,
    /// Connection timeout, zero for none
    pub connect_timeout: Duration,
    pub follow_redirects: bool,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_names_follow_version() {
        let set = PartitionSet::for_version("v2");
        assert_eq!(set.all(), ["shell-v2", "runtime-v2", "background-v2", "media-v2"]);
        assert!(set.contains("media-v2"));
        assert!(!set.contains("media-v1"));
    }

    #[test]
    fn test_default_shell_includes_critical_assets() {
        let config = WorkerConfig::new(SiteOrigin::parse("https://site.test/").unwrap());
        assert_eq!(config.shell_urls.len(), 11);
        assert_eq!(config.shell_urls[0], "/");
        assert!(config.shell_urls.iter().any(|u| u == "assets/music/chikwere.mp3"));
        assert!(config.shell_urls.iter().any(|u| u == "assets/images/background.png"));
    }

    #[test]
    fn test_media_path_detection() {
        let config = WorkerConfig::new(SiteOrigin::parse("https://site.test/").unwrap());
        assert!(config.is_media_path("assets/music/chikwere.mp3"));
        assert!(config.is_media_path("assets/media/a.mp3"));
        assert!(!config.is_media_path("assets/images/1.jpg"));
        assert!(!config.is_media_path("music/a.mp3"));
    }
}
