//! Port definition for the decoded image memory cache.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::CacheKey;

/// Volatile key -> decoded image store.
///
/// Synchronous so lookups never suspend. Implementations own their eviction
/// policy and must be safe for concurrent use.
pub trait MemoryCachePort: Send + Sync {
    /// Returns the cached image, if present.
    fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>>;

    /// Stores an image. `None` removes the entry.
    fn set(&self, key: CacheKey, image: Option<Arc<DynamicImage>>);

    /// Removes every entry.
    fn remove_all(&self);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns hit/miss statistics, if the implementation keeps them.
    fn stats(&self) -> Option<CacheStats> {
        None
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}
