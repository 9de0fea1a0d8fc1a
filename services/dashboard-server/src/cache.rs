//! Cache-Control selection for static assets

/// Fingerprinted bundles: one year, never revalidated
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Everything else: ten minutes
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=600";

/// Maps a request path to the cache-control value of the served file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    immutable_prefix: String,
}

impl CachePolicy {
    pub fn new(immutable_prefix: impl Into<String>) -> Self {
        Self {
            immutable_prefix: immutable_prefix.into(),
        }
    }

    pub fn immutable_prefix(&self) -> &str {
        &self.immutable_prefix
    }

    /// Pure and total over all paths
    pub fn cache_control_for(&self, path: &str) -> &'static str {
        if path.starts_with(&self.immutable_prefix) {
            IMMUTABLE_CACHE_CONTROL
        } else {
            DEFAULT_CACHE_CONTROL
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new("/assets/")
    }
}
