//! Downloader configuration.

pub mod downloader_config;

pub use downloader_config::{ConfigError, DownloaderConfig, default_cache_dir};
