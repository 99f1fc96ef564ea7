//! # Cache Types
//!
//! This module defines common types used across the caching system.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Cache key for identifying a stored response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Request method, upper case
    pub method: String,
    /// Absolute URL of the request
    pub url: String,
}

impl CacheKey {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of the given URL
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Convert to a filename-safe string
    pub fn to_filename(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(" ");
        hasher.update(self.url.as_bytes());

        let hash = hasher.finalize();
        format!("{hash:x}")
    }
}

/// Metadata stored alongside a cached response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the response was cached
    pub cached_at: u64,
    /// Final URL of the response, after redirects
    pub url: String,
    /// HTTP status of the response
    pub status: u16,
    /// Response headers in arrival order
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Size of the body in bytes
    pub size: u64,
}

impl CacheMetadata {
    /// Create new metadata for a body of the given size
    pub fn new(size: u64) -> Self {
        Self {
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            url: String::new(),
            status: 200,
            headers: Vec::new(),
            size,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Content type of the stored response, if it carried one
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

/// A type representing the result of a cache lookup operation
pub type CacheLookupResult = CacheResult<Option<(Bytes, CacheMetadata)>>;
