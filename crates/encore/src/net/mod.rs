//! # Network
//!
//! Request and response model used by the router and the prefetch pipeline,
//! the [`Fetcher`] seam standing in for the browser's network stack, and the
//! site origin every cache-write decision is checked against.

mod http;
mod origin;

pub use http::{HttpFetcher, create_client};
pub use origin::SiteOrigin;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::cache::{CacheKey, CacheMetadata};
use crate::error::WorkerError;

/// An intercepted or outgoing request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl Request {
    /// Create a GET request for the given absolute URL
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Cache identity of this request
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method.as_str(), self.url.as_str())
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// The response handed back when a media request can be served neither
    /// from cache nor from the network.
    pub fn service_unavailable(url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            url,
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::from_static(b"Offline and not cached"),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_range(&self) -> Option<&str> {
        self.headers.get(CONTENT_RANGE).and_then(|v| v.to_str().ok())
    }

    /// Whether the body is the entire resource: a `Content-Range` of
    /// `bytes 0-<last>/<total>` with `last + 1 == total == body length`
    pub fn is_complete_range(&self) -> bool {
        let Some(range) = self.content_range() else {
            return false;
        };
        let parsed = range.trim().strip_prefix("bytes ").and_then(|spec| {
            let (span, total) = spec.split_once('/')?;
            let (first, last) = span.split_once('-')?;
            Some((
                first.trim().parse::<u64>().ok()?,
                last.trim().parse::<u64>().ok()?,
                total.trim().parse::<u64>().ok()?,
            ))
        });
        matches!(
            parsed,
            Some((0, last, total)) if last + 1 == total && total == self.body.len() as u64
        )
    }

    /// Split into the body and the metadata stored alongside it
    pub fn to_cache_entry(&self) -> (Bytes, CacheMetadata) {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let metadata = CacheMetadata::new(self.body.len() as u64)
            .with_url(self.url.as_str())
            .with_status(self.status.as_u16())
            .with_headers(headers);

        (self.body.clone(), metadata)
    }

    /// Rebuild a response from a cache entry. Returns `None` when the stored
    /// metadata is not usable.
    pub fn from_cache_entry(data: Bytes, metadata: &CacheMetadata) -> Option<Self> {
        let url = Url::parse(&metadata.url).ok()?;
        let status = StatusCode::from_u16(metadata.status).ok()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &metadata.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        Some(Self {
            url,
            status,
            headers,
            body: data,
        })
    }
}

/// The network. Production code uses [`HttpFetcher`]; tests script responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. An `Err` means the request never produced a
    /// response (connection refused, DNS failure, timeout, ...). Any HTTP
    /// status, including errors, is an `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_entry_round_trip_keeps_status_and_headers() {
        let url = Url::parse("https://site.test/assets/media/a.mp3").unwrap();
        let mut response = Response::new(url.clone(), StatusCode::PARTIAL_CONTENT, "abc");
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));

        let (data, metadata) = response.to_cache_entry();
        assert_eq!(metadata.size, 3);
        assert_eq!(metadata.content_type(), Some("audio/mpeg"));

        let restored = Response::from_cache_entry(data, &metadata).unwrap();
        assert_eq!(restored.url, url);
        assert_eq!(restored.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(restored.content_type(), Some("audio/mpeg"));
        assert_eq!(restored.body, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_from_cache_entry_rejects_bad_metadata() {
        let metadata = CacheMetadata::new(0).with_url("not a url").with_status(200);
        assert!(Response::from_cache_entry(Bytes::new(), &metadata).is_none());
    }

    #[test]
    fn test_complete_range_detection() {
        let url = Url::parse("https://site.test/assets/media/a.mp3").unwrap();
        let with_range = |range: &'static str, body: &'static str| {
            let mut response = Response::new(url.clone(), StatusCode::PARTIAL_CONTENT, body);
            response
                .headers
                .insert(CONTENT_RANGE, HeaderValue::from_static(range));
            response
        };

        assert!(with_range("bytes 0-3/4", "abcd").is_complete_range());
        assert!(!with_range("bytes 1-3/4", "bcd").is_complete_range());
        assert!(!with_range("bytes 0-1/4", "ab").is_complete_range());
        assert!(!with_range("bytes */4", "").is_complete_range());
        assert!(!Response::new(url.clone(), StatusCode::PARTIAL_CONTENT, "x").is_complete_range());
    }

    #[test]
    fn test_service_unavailable() {
        let url = Url::parse("https://site.test/assets/media/a.mp3").unwrap();
        let response = Response::service_unavailable(url);
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.content_type().unwrap().starts_with("text/plain"));
    }
}
