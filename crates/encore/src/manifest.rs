//! Asset manifests supplied by the page.
//!
//! The worker has no built-in knowledge of which assets exist. Every
//! prefetch run starts from a manifest: an ordered list of site-relative
//! URLs, normalised and split into media and everything else.

use crate::config::WorkerConfig;
use crate::net::SiteOrigin;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    entries: Vec<String>,
    rejected: Vec<String>,
}

impl AssetManifest {
    /// Normalise raw entries. Duplicates keep their first position; entries
    /// that are empty, unparsable or not on the site origin are set aside in
    /// [`rejected`](Self::rejected).
    pub fn parse<I, S>(raw: I, origin: &SiteOrigin) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manifest = Self::default();

        for item in raw {
            let item = item.as_ref();
            match normalize(item, origin) {
                Some(entry) => {
                    if !manifest.entries.contains(&entry) {
                        manifest.entries.push(entry);
                    }
                }
                None => manifest.rejected.push(item.to_owned()),
            }
        }

        manifest
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Split into `(media, non_media)`, both in manifest order
    pub fn partition(&self, config: &WorkerConfig) -> (Vec<String>, Vec<String>) {
        self.entries
            .iter()
            .cloned()
            .partition(|entry| config.is_media_path(entry))
    }

    /// The entries fetched ahead of the bulk media remainder: the preferred
    /// item first, then the first `count` media entries, de-duplicated.
    pub fn priority_set(
        media: &[String],
        preferred: Option<&str>,
        count: usize,
        origin: &SiteOrigin,
    ) -> Vec<String> {
        let mut set: Vec<String> = Vec::with_capacity(count + 1);

        if let Some(preferred) = preferred.and_then(|p| normalize(p, origin)) {
            set.push(preferred);
        }
        for entry in media.iter().take(count) {
            if !set.contains(entry) {
                set.push(entry.clone());
            }
        }

        set
    }
}

/// Site-relative form of a manifest entry or preferred URL
pub fn normalize(raw: &str, origin: &SiteOrigin) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let url = origin.resolve(trimmed).ok()?;
    if !origin.is_cacheable_url(&url) {
        return None;
    }

    let relative = origin.relative_path(&url)?;
    if relative.is_empty() {
        // The site root itself belongs to the shell, not to a manifest
        return None;
    }
    Some(relative)
}
