//! Retrying fetch-and-cache primitive.
//!
//! [`AssetCacher`] is the only code that writes to a cache partition. Every
//! write goes through [`AssetCacher::commit`], which enforces the status,
//! origin and scheme checks.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::cache::{CacheKey, CacheProvider};
use crate::diagnostics::Diagnostics;
use crate::error::WorkerError;
use crate::net::{Fetcher, Request, Response, SiteOrigin};

/// Which statuses may be written to a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// 200 only
    OkOnly,
    /// 200 or 206 (partial content from streamed media)
    OkOrPartial,
}

impl StatusPolicy {
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            StatusPolicy::OkOnly => status == StatusCode::OK,
            StatusPolicy::OkOrPartial => {
                status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT
            }
        }
    }
}

#[derive(Clone)]
pub struct AssetCacher {
    fetcher: Arc<dyn Fetcher>,
    origin: SiteOrigin,
    delay_base: Duration,
    diagnostics: Diagnostics,
}

impl AssetCacher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        origin: SiteOrigin,
        delay_base: Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            fetcher,
            origin,
            delay_base,
            diagnostics,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn origin(&self) -> &SiteOrigin {
        &self.origin
    }

    /// Whether `response` may be stored under `policy`
    pub fn is_cacheable(&self, response: &Response, policy: StatusPolicy) -> bool {
        if !policy.accepts(response.status) || !self.origin.is_cacheable_url(&response.url) {
            return false;
        }
        // A 206 stands in for the whole resource only if it holds all of it
        response.status != StatusCode::PARTIAL_CONTENT
            || response.content_range().is_none()
            || response.is_complete_range()
    }

    /// Write `response` under `key` if it passes the policy checks. Returns
    /// whether an entry was written.
    pub async fn commit(
        &self,
        partition: &dyn CacheProvider,
        key: CacheKey,
        response: &Response,
        policy: StatusPolicy,
    ) -> bool {
        if !self.is_cacheable(response, policy) {
            debug!(
                url = %key.url,
                final_url = %response.url,
                status = %response.status,
                "Response not cacheable"
            );
            return false;
        }

        let (data, metadata) = response.to_cache_entry();
        match partition.put(key, data, metadata).await {
            Ok(()) => true,
            Err(e) => {
                self.diagnostics.warn(
                    format!("cache write failed: {e}"),
                    Some(response.url.as_str()),
                );
                false
            }
        }
    }

    /// Make sure `url` is stored in `partition`.
    ///
    /// Returns `true` when the entry is present afterwards. Gives up after
    /// `max_retries` retries, or as soon as `cancel` fires, and returns
    /// `false`. Never fails loudly.
    pub async fn cache_with_retry(
        &self,
        partition: &dyn CacheProvider,
        url: &str,
        max_retries: u32,
        cancel: Option<&CancellationToken>,
    ) -> bool {
        let target = match self.resolve_target(url) {
            Ok(target) => target,
            Err(e) => {
                self.diagnostics.warn(format!("skipping asset: {e}"), Some(url));
                return false;
            }
        };
        let request = Request::get(target);
        let key = request.cache_key();

        match partition.contains(&key).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!(url = %key.url, error = %e, "Cache lookup failed, fetching"),
        }

        let mut attempt: u32 = 0;
        loop {
            if is_cancelled(cancel) {
                return self.cancelled(url);
            }
            attempt += 1;

            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return self.cancelled(url),
                    result = self.fetcher.fetch(&request) => result,
                },
                None => self.fetcher.fetch(&request).await,
            };

            let failure = match outcome {
                Ok(response) => {
                    if self
                        .commit(partition, key.clone(), &response, StatusPolicy::OkOrPartial)
                        .await
                    {
                        return true;
                    }
                    format!("response not cacheable (status {})", response.status)
                }
                Err(e) => e.to_string(),
            };

            if attempt > max_retries {
                self.diagnostics.warn(
                    format!("giving up after {attempt} attempts: {failure}"),
                    Some(url),
                );
                return false;
            }

            let delay = self.backoff(attempt);
            debug!(url, attempt, delay_ms = delay.as_millis() as u64, error = %failure, "Retrying");

            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return self.cancelled(url),
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Delay before retry number `attempt` (1-based)
    fn backoff(&self, attempt: u32) -> Duration {
        self.delay_base
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }

    fn resolve_target(&self, url: &str) -> Result<Url, WorkerError> {
        let target = self.origin.resolve(url)?;
        if !self.origin.is_cacheable_url(&target) {
            return Err(WorkerError::UrlError(format!(
                "not a same-origin http(s) URL: {target}"
            )));
        }
        Ok(target)
    }

    fn cancelled(&self, url: &str) -> bool {
        self.diagnostics.debug("cancelled", Some(url));
        false
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(CancellationToken::is_cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::test_util::{MockFetcher, abs, diagnostics, origin};
    use tokio::time::Instant;

    fn cacher(fetcher: &Arc<MockFetcher>) -> AssetCacher {
        AssetCacher::new(
            fetcher.clone(),
            origin(),
            Duration::from_millis(500),
            diagnostics(),
        )
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_partition() {
        let fetcher = Arc::new(MockFetcher::new().with_asset("assets/media/a.mp3", "audio"));
        let cacher = cacher(&fetcher);
        let partition = MemoryCache::unbounded();

        assert!(cacher.cache_with_retry(&partition, "assets/media/a.mp3", 2, None).await);
        assert!(cacher.cache_with_retry(&partition, "assets/media/a.mp3", 2, None).await);

        assert_eq!(fetcher.calls_for("assets/media/a.mp3"), 1);
        assert_eq!(partition.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_content_is_cached() {
        let fetcher = Arc::new(
            MockFetcher::new().with_status("assets/media/a.mp3", StatusCode::PARTIAL_CONTENT),
        );
        let partition = MemoryCache::unbounded();

        assert!(
            cacher(&fetcher)
                .cache_with_retry(&partition, "assets/media/a.mp3", 0, None)
                .await
        );
        let (_, meta) = partition
            .get(&CacheKey::get(abs("assets/media/a.mp3")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.status, 206);
    }

    #[tokio::test]
    async fn test_foreign_urls_are_never_fetched_or_cached() {
        let fetcher = Arc::new(MockFetcher::new());
        let cacher = cacher(&fetcher);
        let partition = MemoryCache::unbounded();

        assert!(
            !cacher
                .cache_with_retry(&partition, "https://cdn.other.test/a.mp3", 2, None)
                .await
        );
        assert!(
            !cacher
                .cache_with_retry(&partition, "chrome-extension://abc/inject.js", 2, None)
                .await
        );

        assert_eq!(fetcher.total_calls(), 0);
        assert!(partition.keys().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_off_origin_is_not_cached() {
        let fetcher = Arc::new(
            MockFetcher::new().with_redirect("assets/media/a.mp3", "https://cdn.other.test/a.mp3"),
        );
        let partition = MemoryCache::unbounded();

        assert!(
            !cacher(&fetcher)
                .cache_with_retry(&partition, "assets/media/a.mp3", 1, None)
                .await
        );
        assert!(partition.keys().await.unwrap().is_empty());
        assert_eq!(fetcher.calls_for("assets/media/a.mp3"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_is_not_cached() {
        let fetcher = Arc::new(MockFetcher::new().with_status("missing.png", StatusCode::NOT_FOUND));
        let partition = MemoryCache::unbounded();

        assert!(!cacher(&fetcher).cache_with_retry(&partition, "missing.png", 0, None).await);
        assert!(partition.keys().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_uses_exponential_backoff() {
        let fetcher = Arc::new(MockFetcher::new().with_failure("assets/media/a.mp3"));
        let partition = MemoryCache::unbounded();
        let started = Instant::now();

        assert!(
            !cacher(&fetcher)
                .cache_with_retry(&partition, "assets/media/a.mp3", 2, None)
                .await
        );

        let calls = fetcher.call_times("assets/media/a.mp3");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0] - started, Duration::ZERO);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(500));
        assert_eq!(calls[2] - calls[1], Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_asset("assets/img/b.png", "png")
                .failing_first("assets/img/b.png", 1),
        );
        let partition = MemoryCache::unbounded();

        assert!(cacher(&fetcher).cache_with_retry(&partition, "assets/img/b.png", 2, None).await);
        assert_eq!(fetcher.calls_for("assets/img/b.png"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_without_retrying() {
        let fetcher = Arc::new(MockFetcher::new().with_failure("assets/media/a.mp3"));
        let cacher = cacher(&fetcher);
        let partition = MemoryCache::unbounded();
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            // Lands inside the first backoff sleep
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        assert!(
            !cacher
                .cache_with_retry(&partition, "assets/media/a.mp3", 5, Some(&token))
                .await
        );
        assert_eq!(fetcher.calls_for("assets/media/a.mp3"), 1);
        assert_eq!(started.elapsed(), Duration::from_millis(100));

        // Already cancelled: no fetch at all
        assert!(
            !cacher
                .cache_with_retry(&partition, "assets/media/b.mp3", 5, Some(&token))
                .await
        );
        assert_eq!(fetcher.calls_for("assets/media/b.mp3"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_in_flight_fetch() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_asset("assets/media/slow.mp3", "audio")
                .with_delay(Duration::from_secs(5)),
        );
        let cacher = cacher(&fetcher);
        let partition = MemoryCache::unbounded();
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        assert!(
            !cacher
                .cache_with_retry(&partition, "assets/media/slow.mp3", 2, Some(&token))
                .await
        );
        assert!(partition.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_enforces_policy() {
        let fetcher = Arc::new(MockFetcher::new());
        let cacher = cacher(&fetcher);
        let partition = MemoryCache::unbounded();
        let url = Url::parse(&abs("page.html")).unwrap();

        let partial = Response::new(url.clone(), StatusCode::PARTIAL_CONTENT, "p");
        assert!(
            !cacher
                .commit(&partition, CacheKey::get(url.as_str()), &partial, StatusPolicy::OkOnly)
                .await
        );
        assert!(
            cacher
                .commit(
                    &partition,
                    CacheKey::get(url.as_str()),
                    &partial,
                    StatusPolicy::OkOrPartial
                )
                .await
        );

        let mut fragment = Response::new(url.clone(), StatusCode::PARTIAL_CONTENT, "agment");
        fragment.headers.insert(
            reqwest::header::CONTENT_RANGE,
            reqwest::header::HeaderValue::from_static("bytes 2-7/8"),
        );
        assert!(
            !cacher
                .commit(
                    &partition,
                    CacheKey::get(url.as_str()),
                    &fragment,
                    StatusPolicy::OkOrPartial
                )
                .await
        );

        let foreign = Response::new(
            Url::parse("https://cdn.other.test/page.html").unwrap(),
            StatusCode::OK,
            "f",
        );
        assert!(
            !cacher
                .commit(&partition, CacheKey::get(url.as_str()), &foreign, StatusPolicy::OkOnly)
                .await
        );
    }
}
