//! Content-addressed store for immutable images.
//!
//! Files live at `<cache_dir>/image-cache/<hex sha256(key)>` and hold the
//! encoded bytes only. The presence of a file is the whole index. Nothing in
//! this crate ever deletes them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{ImageError, ImageResult};

/// Name of the store directory under the cache directory.
pub const STORE_DIR_NAME: &str = "image-cache";

/// Write-once, read-many image store.
#[derive(Debug, Clone)]
pub struct ImmutableStore {
    root: PathBuf,
}

impl ImmutableStore {
    /// Creates a store under `cache_dir`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            root: cache_dir.as_ref().join(STORE_DIR_NAME),
        }
    }

    /// Creates a store in the platform cache directory.
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(crate::infrastructure::config::default_cache_dir())
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for a key.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.digest())
    }

    /// Reads the stored bytes for a key.
    ///
    /// # Errors
    /// Returns `ImageError::Io` for any failure other than a missing file.
    pub async fn read(&self, key: &CacheKey) -> ImageResult<Option<Bytes>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Persistent store hit");
                Ok(Some(Bytes::from(bytes)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(key = %key, "Persistent store miss");
                Ok(None)
            }
            Err(e) => Err(ImageError::io(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Writes bytes for a key, creating the directory if needed.
    /// Concurrent writers race; the last write wins.
    ///
    /// # Errors
    /// Returns `ImageError::Io` if the directory or file cannot be written.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> ImageResult<()> {
        let path = self.path_for(key);

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ImageError::io(format!("Failed to create store dir: {e}")))?;

        fs::write(&path, bytes)
            .await
            .map_err(|e| ImageError::io(format!("Failed to write store file: {e}")))?;

        debug!(
            key = %key,
            path = %path.display(),
            size = bytes.len(),
            "Stored image in persistent store"
        );
        Ok(())
    }

    /// Checks if a key is stored.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }
}
