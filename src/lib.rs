//! pixfetch - A deduplicating image fetcher.
//!
//! This crate downloads, decodes and caches images with three tiers: an
//! in-memory LRU of decoded images, a persistent store for immutable
//! resources, and HTTP sessions backed by a bounded response cache.
//! Concurrent requests for the same URL share a single network fetch.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the fetch coordinator.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, sessions and the downloader.
pub mod infrastructure;

pub use application::FetchCoordinator;
pub use domain::entities::{
    CacheKey, ImageOrigin, ImageRequest, ImageSize, ImageSource, LoadedImage, RequestOptions,
    ResourceMutability, TransportRequest, VideoAsset,
};
pub use domain::errors::{ImageError, ImageResult};
pub use infrastructure::{DownloaderConfig, ImageDownloader, ImageDownloaderBuilder};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "pixfetch";
