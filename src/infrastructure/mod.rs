//! Infrastructure layer with caches, transports and the downloader.

/// Downloader configuration.
pub mod config;
/// Image handling (caching, sessions, decoding, downloading).
pub mod image;

pub use config::{ConfigError, DownloaderConfig};
pub use image::{
    HttpSession, ImageDownloader, ImageDownloaderBuilder, ImmutableStore, MemoryImageCache,
    RasterDecoder, ResponseCache,
};
