use url::Url;

use crate::error::WorkerError;

/// The single origin the site is served from. Relative asset URLs are resolved
/// against it and only responses from it are ever written to a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOrigin {
    base: Url,
}

impl SiteOrigin {
    /// Parse the site base URL. A path without a trailing slash is treated as
    /// a directory so relative references resolve beneath it.
    pub fn parse(input: &str) -> Result<Self, WorkerError> {
        let mut base = Url::parse(input)?;
        if !is_http_scheme(&base) {
            return Err(WorkerError::ConfigError(format!(
                "site origin must be http or https: {input}"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn url(&self) -> &Url {
        &self.base
    }

    /// Resolve a (possibly relative) reference against the site base
    pub fn resolve(&self, reference: &str) -> Result<Url, WorkerError> {
        Ok(self.base.join(reference.trim())?)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.base.origin()
    }

    /// Same origin and a scheme the cache can hold
    pub fn is_cacheable_url(&self, url: &Url) -> bool {
        is_http_scheme(url) && self.is_same_origin(url)
    }

    /// Site-relative form of a same-origin URL: no origin, no leading slash,
    /// query kept. `None` for foreign URLs.
    pub fn relative_path(&self, url: &Url) -> Option<String> {
        if !self.is_same_origin(url) {
            return None;
        }

        let mut relative = match url.path().strip_prefix(self.base.path()) {
            Some(rest) => rest.to_string(),
            None => url.path().trim_start_matches('/').to_string(),
        };
        if let Some(query) = url.query() {
            relative.push('?');
            relative.push_str(query);
        }
        Some(relative)
    }
}

pub(crate) fn is_http_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
