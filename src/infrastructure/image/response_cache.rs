//! Bounded HTTP response cache backing the cached transport session.
//!
//! Responses are keyed by request URL and kept in two tiers: an LRU in
//! memory bounded by body bytes, and a directory on disk bounded by total
//! body size. Disk entries are `<sha256(url)>.body` plus a JSON `.meta.json`
//! sidecar; the sidecar is written last so a reader never sees metadata
//! without its body.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::errors::{ImageError, ImageResult};

/// Default memory capacity (32 MB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = 32 * 1024 * 1024;

/// Default disk capacity (256 MB).
pub const DEFAULT_DISK_CAPACITY: u64 = 256 * 1024 * 1024;

const BODY_EXT: &str = "body";
const META_EXT: &str = "meta.json";

/// Response metadata needed for freshness checks and revalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Original HTTP status.
    pub status: u16,
    /// `ETag` validator.
    pub etag: Option<String>,
    /// `Last-Modified` validator.
    pub last_modified: Option<String>,
    /// `Content-Type` header.
    pub content_type: Option<String>,
    /// `Cache-Control: max-age` in seconds.
    pub max_age: Option<i64>,
    /// When the response was stored.
    pub stored_at: DateTime<Utc>,
}

impl ResponseMeta {
    /// Returns true while `max-age` has not elapsed.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.max_age
            .is_some_and(|age| (now - self.stored_at).num_seconds() < age)
    }

    /// Returns true if the response can be revalidated.
    #[must_use]
    pub const fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// A cached response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Metadata.
    pub meta: ResponseMeta,
    /// Response body.
    pub body: Bytes,
}

struct MemoryTier {
    entries: LruCache<String, CachedResponse>,
    bytes: u64,
}

/// Two-tier bounded response cache.
pub struct ResponseCache {
    memory: Mutex<MemoryTier>,
    memory_capacity: u64,
    dir: PathBuf,
    disk_capacity: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("dir", &self.dir)
            .field("memory_capacity", &self.memory_capacity)
            .field("disk_capacity", &self.disk_capacity)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Opens (or creates) a cache in `dir`.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created or read.
    pub async fn new(dir: PathBuf, memory_capacity: u64, disk_capacity: u64) -> ImageResult<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ImageError::io(format!("Failed to create response cache dir: {e}")))?;

        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| ImageError::io(format!("Failed to read response cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == BODY_EXT)
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            memory: Mutex::new(MemoryTier {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            memory_capacity,
            dir,
            disk_capacity,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        cache.cleanup_if_needed().await;

        Ok(cache)
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        (
            self.dir.join(format!("{digest}.{BODY_EXT}")),
            self.dir.join(format!("{digest}.{META_EXT}")),
        )
    }

    /// Looks up a response, promoting disk hits into memory.
    pub async fn get(&self, url: &str) -> Option<CachedResponse> {
        let memory_hit = self.memory.lock().entries.get(url).cloned();
        if let Some(hit) = memory_hit {
            trace!(url, "Response cache memory hit");
            return Some(hit);
        }

        let (body_path, meta_path) = self.paths(url);
        let Ok(raw_meta) = fs::read(&meta_path).await else {
            trace!(url, "Response cache miss");
            return None;
        };

        let meta: ResponseMeta = match serde_json::from_slice(&raw_meta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(url, error = %e, "Discarding unreadable response metadata");
                self.evict(url).await;
                return None;
            }
        };

        let body = match fs::read(&body_path).await {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(url, error = %e, "Discarding response without body");
                self.evict(url).await;
                return None;
            }
        };

        trace!(url, "Response cache disk hit");
        let response = CachedResponse { meta, body };
        self.put_memory(url, response.clone());
        Some(response)
    }

    /// Stores a response in both tiers.
    ///
    /// # Errors
    /// Returns error if the disk entry cannot be written. The memory tier is
    /// updated regardless.
    pub async fn put(&self, url: &str, response: CachedResponse) -> ImageResult<()> {
        self.put_memory(url, response.clone());

        let (body_path, meta_path) = self.paths(url);
        let old_size = fs::metadata(&body_path).await.map(|m| m.len()).ok();

        let meta = serde_json::to_vec(&response.meta)
            .map_err(|e| ImageError::io(format!("Failed to encode response metadata: {e}")))?;

        fs::write(&body_path, &response.body)
            .await
            .map_err(|e| ImageError::io(format!("Failed to write response body: {e}")))?;
        fs::write(&meta_path, meta)
            .await
            .map_err(|e| ImageError::io(format!("Failed to write response metadata: {e}")))?;

        let new_size = response.body.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size.fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.current_size.fetch_sub(old - new_size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(url, size = new_size, "Stored response in response cache");

        self.cleanup_if_needed().await;

        Ok(())
    }

    fn put_memory(&self, url: &str, response: CachedResponse) {
        let size = response.body.len() as u64;

        let mut memory = self.memory.lock();
        if let Some(old) = memory.entries.pop(url) {
            memory.bytes -= old.body.len() as u64;
        }
        if size > self.memory_capacity {
            return;
        }

        memory.entries.put(url.to_string(), response);
        memory.bytes += size;

        while memory.bytes > self.memory_capacity {
            let Some((_, evicted)) = memory.entries.pop_lru() else {
                break;
            };
            memory.bytes -= evicted.body.len() as u64;
        }
    }

    /// Removes a response from both tiers.
    pub async fn evict(&self, url: &str) {
        {
            let mut memory = self.memory.lock();
            if let Some(old) = memory.entries.pop(url) {
                memory.bytes -= old.body.len() as u64;
            }
        }

        let (body_path, meta_path) = self.paths(url);
        let _ = fs::remove_file(&meta_path).await;
        let size = fs::metadata(&body_path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&body_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(url, error = %e, "Failed to evict from response cache");
            }
        } else if let Some(s) = size {
            self.current_size.fetch_sub(s, Ordering::Relaxed);
            self.item_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Clears both tiers.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear(&self) -> ImageResult<()> {
        {
            let mut memory = self.memory.lock();
            memory.entries.clear();
            memory.bytes = 0;
        }

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| ImageError::io(format!("Failed to read response cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ImageError::io(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if is_cache_file(&path) && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "Failed to remove response cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!(dir = %self.dir.display(), "Cleared response cache");
        Ok(())
    }

    /// Returns the bytes held in memory.
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        self.memory.lock().bytes
    }

    /// Returns the body bytes held on disk.
    #[must_use]
    pub fn disk_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of entries on disk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if nothing is stored on disk.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes least recently accessed entries once over the disk limit,
    /// down to 90% of it.
    async fn cleanup_if_needed(&self) {
        let current_size = self.disk_size();
        if current_size <= self.disk_capacity {
            return;
        }

        debug!(
            current_size = current_size,
            max_size = self.disk_capacity,
            "Response cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != BODY_EXT) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                let accessed = meta.accessed().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - self.disk_capacity + (self.disk_capacity / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old response");
            } else {
                let _ = fs::remove_file(path.with_extension(META_EXT)).await;
                freed_size += size;
                freed_count += 1;
            }
        }
        self.current_size.fetch_sub(freed_size, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Response cache cleanup complete"
        );
    }
}

fn is_cache_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name.ends_with(&format!(".{BODY_EXT}")) || name.ends_with(&format!(".{META_EXT}"))
        })
}
