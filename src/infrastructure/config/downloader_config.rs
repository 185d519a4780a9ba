//! Downloader configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const APP_NAME: &str = "pixfetch";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Configuration loading errors.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Tunables for the downloader, its caches and its HTTP sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Maximum number of decoded images kept in memory.
    #[serde(default = "default_memory_cache_capacity")]
    pub memory_cache_capacity: usize,

    /// Memory budget of the HTTP response cache, in bytes.
    #[serde(default = "default_response_cache_memory_bytes")]
    pub response_cache_memory_bytes: u64,

    /// Disk budget of the HTTP response cache, in bytes.
    #[serde(default = "default_response_cache_disk_bytes")]
    pub response_cache_disk_bytes: u64,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    #[serde(default = "default_true")]
    pub use_system_proxy: bool,

    /// Root for the persistent store and the response cache.
    /// Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_memory_cache_capacity() -> usize {
    crate::infrastructure::image::memory_cache::DEFAULT_CACHE_SIZE
}

fn default_response_cache_memory_bytes() -> u64 {
    crate::infrastructure::image::response_cache::DEFAULT_MEMORY_CAPACITY
}

fn default_response_cache_disk_bytes() -> u64 {
    crate::infrastructure::image::response_cache::DEFAULT_DISK_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("{}/{}", crate::NAME, crate::VERSION)
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            memory_cache_capacity: default_memory_cache_capacity(),
            response_cache_memory_bytes: default_response_cache_memory_bytes(),
            response_cache_disk_bytes: default_response_cache_disk_bytes(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            use_system_proxy: true,
            cache_dir: None,
        }
    }
}

impl DownloaderConfig {
    /// Parses a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if the document is not valid TOML for this type.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a TOML file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("Config file not found at {:?}, using defaults.", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Returns the configured cache directory or the platform default.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Directory of the HTTP response cache.
    #[must_use]
    pub fn response_cache_dir(&self) -> PathBuf {
        self.effective_cache_dir().join("responses")
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Returns the platform cache directory (e.g. `~/.cache/pixfetch`).
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("cache"),
        |dirs| dirs.cache_dir().to_path_buf(),
    )
}
