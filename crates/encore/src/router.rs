//! # Request Router
//!
//! Decides how an intercepted request is answered once the worker controls
//! the page:
//!
//! - media paths are cache-first across every partition, fall back to the
//!   network, and finally to a synthesized 503 so audio playback fails
//!   quietly offline
//! - other same-origin GETs are cache-first with runtime caching of 200s
//! - everything else passes straight through

use std::sync::Arc;

use reqwest::header::RANGE;
use reqwest::{Method, StatusCode};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::cache::{CacheKey, CacheStorage};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::net::{Request, Response};
use crate::retry::{AssetCacher, StatusPolicy};

/// What to do with an intercepted request
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; let the request reach the network untouched
    Passthrough,
    /// Answer with this response
    Respond(Response),
    /// The network failed and nothing cached could stand in
    NetworkError(WorkerError),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

#[derive(Clone)]
pub struct Router {
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    cacher: AssetCacher,
    tasks: TaskTracker,
}

impl Router {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: CacheStorage,
        cacher: AssetCacher,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            config,
            storage,
            cacher,
            tasks,
        }
    }

    pub async fn route(&self, request: &Request) -> FetchOutcome {
        if request.method != Method::GET || !self.config.origin.is_cacheable_url(&request.url) {
            return FetchOutcome::Passthrough;
        }

        let is_media = self
            .config
            .origin
            .relative_path(&request.url)
            .is_some_and(|path| self.config.is_media_path(&path));
        let key = request.cache_key();

        if let Some(hit) = self.lookup(&key).await {
            debug!(url = %request.url, media = is_media, "Serving from cache");
            return FetchOutcome::Respond(hit);
        }

        match self.cacher.fetcher().fetch(request).await {
            Ok(response) => {
                let partitions = self.config.partitions();
                let (partition, policy) = if is_media {
                    (partitions.media, StatusPolicy::OkOrPartial)
                } else {
                    (partitions.runtime, StatusPolicy::OkOnly)
                };
                // A seek fetches a fragment; only a complete body may stand
                // in for the track under its plain GET key
                let ranged = request.headers.contains_key(RANGE);
                if !ranged
                    || response.status != StatusCode::PARTIAL_CONTENT
                    || response.is_complete_range()
                {
                    self.spawn_commit(partition, key, &response, policy);
                } else {
                    debug!(url = %request.url, "Not caching partial response to a range request");
                }
                FetchOutcome::Respond(response)
            }
            Err(e) if is_media => {
                debug!(url = %request.url, error = %e, "Media fetch failed, trying cache again");
                match self.lookup(&key).await {
                    Some(hit) => FetchOutcome::Respond(hit),
                    None => FetchOutcome::Respond(Response::service_unavailable(request.url.clone())),
                }
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Fetch failed");
                FetchOutcome::NetworkError(e)
            }
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        let (data, metadata) = self.storage.match_any(key).await?;
        Response::from_cache_entry(data, &metadata)
    }

    /// Store a copy of `response` without holding up the reply
    fn spawn_commit(
        &self,
        partition: String,
        key: CacheKey,
        response: &Response,
        policy: StatusPolicy,
    ) {
        if !self.cacher.is_cacheable(response, policy) {
            return;
        }

        let storage = self.storage.clone();
        let cacher = self.cacher.clone();
        let response = response.clone();
        self.tasks.spawn(async move {
            match storage.open(&partition) {
                Ok(provider) => {
                    cacher.commit(provider.as_ref(), key, &response, policy).await;
                }
                Err(e) => debug!(partition = %partition, error = %e, "Cannot open partition"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use reqwest::header::HeaderValue;
    use url::Url;

    use crate::test_util::{MockFetcher, abs, diagnostics, init_tracing, origin};

    struct Harness {
        fetcher: Arc<MockFetcher>,
        storage: CacheStorage,
        tasks: TaskTracker,
        router: Router,
    }

    impl Harness {
        fn new(fetcher: MockFetcher) -> Self {
            init_tracing();
            let fetcher = Arc::new(fetcher);
            let config = Arc::new(WorkerConfig::new(origin()));
            let storage = CacheStorage::in_memory();
            let tasks = TaskTracker::new();
            let cacher = AssetCacher::new(
                fetcher.clone(),
                origin(),
                Duration::from_millis(500),
                diagnostics(),
            );
            let router = Router::new(config, storage.clone(), cacher, tasks.clone());
            Self {
                fetcher,
                storage,
                tasks,
                router,
            }
        }

        async fn flush(&self) {
            self.tasks.close();
            self.tasks.wait().await;
            self.tasks.reopen();
        }

        async fn cached(&self, partition: &str, path: &str) -> bool {
            match self.storage.open(partition) {
                Ok(p) => p.contains(&CacheKey::get(abs(path))).await.unwrap(),
                Err(_) => false,
            }
        }
    }

    fn get(path: &str) -> Request {
        Request::get(Url::parse(&abs(path)).unwrap())
    }

    #[tokio::test]
    async fn test_media_hit_is_served_without_fetching() {
        let h = Harness::new(MockFetcher::new());
        let cached = Response::new(
            Url::parse(&abs("assets/media/a.mp3")).unwrap(),
            StatusCode::OK,
            "cached audio",
        );
        let (data, meta) = cached.to_cache_entry();
        h.storage
            .open("background-v1")
            .unwrap()
            .put(CacheKey::get(abs("assets/media/a.mp3")), data, meta)
            .await
            .unwrap();

        let outcome = h.router.route(&get("assets/media/a.mp3")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.body, Bytes::from_static(b"cached audio"));
        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_media_miss_fetches_and_caches_in_background() {
        let h = Harness::new(MockFetcher::new().with_asset("assets/music/b.mp3", "audio"));

        let outcome = h.router.route(&get("assets/music/b.mp3")).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::OK);
        assert_eq!(h.fetcher.calls_for("assets/music/b.mp3"), 1);

        h.flush().await;
        assert!(h.cached("media-v1", "assets/music/b.mp3").await);

        // Second request is a hit
        h.router.route(&get("assets/music/b.mp3")).await;
        assert_eq!(h.fetcher.calls_for("assets/music/b.mp3"), 1);
    }

    #[tokio::test]
    async fn test_media_partial_content_is_cached() {
        let h = Harness::new(
            MockFetcher::new().with_status("assets/media/c.mp3", StatusCode::PARTIAL_CONTENT),
        );

        let outcome = h.router.route(&get("assets/media/c.mp3")).await;
        assert_eq!(
            outcome.response().unwrap().status,
            StatusCode::PARTIAL_CONTENT
        );
        h.flush().await;
        assert!(h.cached("media-v1", "assets/media/c.mp3").await);
    }

    #[tokio::test]
    async fn test_media_offline_and_uncached_is_503() {
        let h = Harness::new(MockFetcher::new().with_failure("assets/media/gone.mp3"));

        let outcome = h.router.route(&get("assets/media/gone.mp3")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.content_type().unwrap().starts_with("text/plain"));

        h.flush().await;
        assert!(!h.cached("media-v1", "assets/media/gone.mp3").await);
    }

    #[tokio::test]
    async fn test_media_error_status_is_returned_not_cached() {
        let h = Harness::new(MockFetcher::new());

        let outcome = h.router.route(&get("assets/media/missing.mp3")).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::NOT_FOUND);
        h.flush().await;
        assert!(!h.cached("media-v1", "assets/media/missing.mp3").await);
    }

    #[tokio::test]
    async fn test_seek_fragment_is_not_cached_as_the_track() {
        let h = Harness::new(
            MockFetcher::new()
                .with_status("assets/media/long.mp3", StatusCode::PARTIAL_CONTENT)
                .with_header(
                    "assets/media/long.mp3",
                    "content-range",
                    "bytes 1000000-1999999/5000000",
                )
                .with_status("assets/media/bare.mp3", StatusCode::PARTIAL_CONTENT),
        );

        for path in ["assets/media/long.mp3", "assets/media/bare.mp3"] {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(RANGE, HeaderValue::from_static("bytes=1000000-"));
            let seek = get(path).with_headers(headers);

            let outcome = h.router.route(&seek).await;
            assert_eq!(
                outcome.response().unwrap().status,
                StatusCode::PARTIAL_CONTENT
            );
            h.flush().await;
            assert!(!h.cached("media-v1", path).await);

            // The next plain request goes back to the network
            h.router.route(&get(path)).await;
            assert_eq!(h.fetcher.calls_for(path), 2);
        }
    }

    #[tokio::test]
    async fn test_ranged_request_answered_in_full_is_cached() {
        let h = Harness::new(MockFetcher::new().with_asset("assets/media/short.mp3", "audio"));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-"));
        h.router
            .route(&get("assets/media/short.mp3").with_headers(headers))
            .await;
        h.flush().await;

        assert!(h.cached("media-v1", "assets/media/short.mp3").await);
    }

    #[tokio::test]
    async fn test_default_path_caches_only_ok() {
        let h = Harness::new(
            MockFetcher::new()
                .with_asset("letter.js", "js")
                .with_status("clip.webm", StatusCode::PARTIAL_CONTENT),
        );

        h.router.route(&get("letter.js")).await;
        h.router.route(&get("clip.webm")).await;
        h.flush().await;

        assert!(h.cached("runtime-v1", "letter.js").await);
        assert!(!h.cached("runtime-v1", "clip.webm").await);
        assert!(!h.cached("media-v1", "letter.js").await);
    }

    #[tokio::test]
    async fn test_default_path_network_failure() {
        let h = Harness::new(MockFetcher::new().with_failure("letter.js"));

        let outcome = h.router.route(&get("letter.js")).await;
        assert!(matches!(outcome, FetchOutcome::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_redirect_off_origin_is_served_but_not_cached() {
        let h = Harness::new(
            MockFetcher::new().with_redirect("fonts.css", "https://cdn.other.test/fonts.css"),
        );

        let outcome = h.router.route(&get("fonts.css")).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::OK);
        h.flush().await;
        assert!(h.storage.open("runtime-v1").unwrap().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_passthrough() {
        let h = Harness::new(MockFetcher::new());

        let post = Request::new(Method::POST, Url::parse(&abs("letter.js")).unwrap());
        let foreign = Request::get(Url::parse("https://cdn.other.test/assets/media/a.mp3").unwrap());
        let extension = Request::get(Url::parse("chrome-extension://abc/inject.js").unwrap());

        assert!(h.router.route(&post).await.is_passthrough());
        assert!(h.router.route(&foreign).await.is_passthrough());
        assert!(h.router.route(&extension).await.is_passthrough());
        assert_eq!(h.fetcher.total_calls(), 0);
    }
}
