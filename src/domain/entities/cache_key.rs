//! Cache key derivation.

use reqwest::Url;
use sha2::{Digest, Sha256};

use super::ImageSize;

/// Identifies a (resource, target size) pair in the memory cache and the
/// persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for an image URL and an optional target size.
    ///
    /// A missing URL is a caller bug: debug builds panic, release builds log
    /// and fall back to an empty key.
    #[must_use]
    pub fn make(url: Option<&Url>, size: Option<ImageSize>) -> Self {
        let Some(url) = url else {
            debug_assert!(false, "cache key requested for a request without URL");
            tracing::error!("cache key requested for a request without URL");
            return Self(String::new());
        };

        match size {
            Some(size) => Self(format!("{}?w={},h={}", url.as_str(), size.width, size.height)),
            None => Self(url.as_str().to_string()),
        }
    }

    /// Wraps an already derived key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the lowercase hex SHA-256 digest of the key's UTF-8 bytes.
    /// Used as the on-disk file name.
    #[must_use]
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
