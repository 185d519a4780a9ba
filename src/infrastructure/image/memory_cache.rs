//! In-memory LRU image cache implementation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheStats, MemoryCachePort};

/// Default maximum number of images to cache in memory.
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// In-memory LRU cache for decoded images.
/// Thread-safe; every operation holds the lock only for the map access.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<CacheKey, Arc<DynamicImage>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the specified capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }

    /// Peeks at an image without promoting it in the LRU or touching stats.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        self.cache.lock().peek(key).cloned()
    }

    /// Returns true if the key is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.lock().contains(key)
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl MemoryCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let mut cache = self.cache.lock();
        if let Some(img) = cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn set(&self, key: CacheKey, image: Option<Arc<DynamicImage>>) {
        let mut cache = self.cache.lock();
        if let Some(image) = image {
            debug!(key = %key, "Storing image in memory cache");
            cache.put(key, image);
        } else if cache.pop(&key).is_some() {
            debug!(key = %key, "Removed image from memory cache");
        }
    }

    fn remove_all(&self) {
        self.cache.lock().clear();
        debug!("Cleared memory image cache");
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self) -> Option<CacheStats> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Some(CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        })
    }
}
