//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction
//! - A persistent store for immutable images
//! - HTTP sessions with a bounded response cache
//! - Decoding and downscaling on the blocking pool
//! - The downloader facade tying them together

pub mod decoder;
pub mod downloader;
pub mod http_session;
pub mod immutable_store;
pub mod memory_cache;
pub mod response_cache;

pub use decoder::{RasterDecoder, fit_within};
pub use downloader::{ImageDownloader, ImageDownloaderBuilder};
pub use http_session::HttpSession;
pub use immutable_store::ImmutableStore;
pub use memory_cache::MemoryImageCache;
pub use response_cache::{CachedResponse, ResponseCache, ResponseMeta};
