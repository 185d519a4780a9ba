//! Image request model.

use std::sync::Arc;

use image::DynamicImage;
use reqwest::Url;

use super::TransportRequest;
use crate::domain::ports::MediaHost;

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageSize {
    /// Creates a size from pixel dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Converts a size in points to pixels for the given display scale.
    /// Scales below 1 are treated as 1; fractional pixels are truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scaled(width: f64, height: f64, scale: f64) -> Self {
        let scale = scale.max(1.0);
        Self {
            width: (width * scale).max(0.0) as u32,
            height: (height * scale).max(0.0) as u32,
        }
    }
}

/// Whether the content behind a URL can change over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceMutability {
    /// Content may change at the same URL (avatars, site icons).
    /// Cached in memory and by the HTTP response cache only.
    #[default]
    Mutable,
    /// Content never changes once published (attachments).
    /// Additionally kept in the persistent store, never evicted.
    Immutable,
}

/// Per-request caching and resizing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestOptions {
    /// Downscale to this pixel size at decode time.
    pub size: Option<ImageSize>,
    /// Read from and write to the memory cache.
    pub memory_cache_enabled: bool,
    /// Use the cached transport session and the persistent store.
    pub disk_cache_enabled: bool,
    /// Only meaningful when `disk_cache_enabled` is set.
    pub mutability: ResourceMutability,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            size: None,
            memory_cache_enabled: true,
            disk_cache_enabled: true,
            mutability: ResourceMutability::Mutable,
        }
    }
}

impl RequestOptions {
    /// Sets the target size.
    #[must_use]
    pub const fn with_size(mut self, size: ImageSize) -> Self {
        self.size = Some(size);
        self
    }

    /// Enables or disables the memory cache.
    #[must_use]
    pub const fn with_memory_cache(mut self, enabled: bool) -> Self {
        self.memory_cache_enabled = enabled;
        self
    }

    /// Enables or disables disk caching.
    #[must_use]
    pub const fn with_disk_cache(mut self, enabled: bool) -> Self {
        self.disk_cache_enabled = enabled;
        self
    }

    /// Sets the resource mutability.
    #[must_use]
    pub const fn with_mutability(mut self, mutability: ResourceMutability) -> Self {
        self.mutability = mutability;
        self
    }

    /// Returns true if results for this request go to the persistent store.
    #[must_use]
    pub fn persists_immutably(&self) -> bool {
        self.disk_cache_enabled && self.mutability == ResourceMutability::Immutable
    }
}

/// Where the image comes from.
#[derive(Clone)]
pub enum ImageSource {
    /// A remote image, optionally authenticated by a media host.
    Remote {
        /// Image URL.
        url: Url,
        /// Host that signs the request.
        host: Option<Arc<dyn MediaHost>>,
    },
    /// A fully formed request; no authentication is applied.
    Prepared(TransportRequest),
    /// A frame extracted from a video.
    VideoFrame {
        /// Video URL.
        url: Url,
        /// Host that signs the asset.
        host: Option<Arc<dyn MediaHost>>,
    },
}

impl ImageSource {
    /// Returns the resource URL, if any.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Remote { url, .. } | Self::VideoFrame { url, .. } => Some(url),
            Self::Prepared(request) => request.url.as_ref(),
        }
    }

    /// Returns the media host, if any.
    #[must_use]
    pub fn host(&self) -> Option<&Arc<dyn MediaHost>> {
        match self {
            Self::Remote { host, .. } | Self::VideoFrame { host, .. } => host.as_ref(),
            Self::Prepared(_) => None,
        }
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { url, host } => f
                .debug_struct("Remote")
                .field("url", &url.as_str())
                .field("authenticated", &host.is_some())
                .finish(),
            Self::Prepared(request) => f.debug_tuple("Prepared").field(request).finish(),
            Self::VideoFrame { url, host } => f
                .debug_struct("VideoFrame")
                .field("url", &url.as_str())
                .field("authenticated", &host.is_some())
                .finish(),
        }
    }
}

/// A single image request. Built once per call.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Image source.
    pub source: ImageSource,
    /// Caching and resizing options.
    pub options: RequestOptions,
}

impl ImageRequest {
    /// Requests a remote image.
    #[must_use]
    pub fn url(url: Url) -> Self {
        Self::from_source(ImageSource::Remote { url, host: None })
    }

    /// Requests a remote image authenticated by `host`.
    #[must_use]
    pub fn url_with_host(url: Url, host: Arc<dyn MediaHost>) -> Self {
        Self::from_source(ImageSource::Remote {
            url,
            host: Some(host),
        })
    }

    /// Requests the image behind a prepared transport request.
    #[must_use]
    pub fn prepared(request: TransportRequest) -> Self {
        Self::from_source(ImageSource::Prepared(request))
    }

    /// Requests the first frame of a video.
    #[must_use]
    pub fn video(url: Url) -> Self {
        Self::from_source(ImageSource::VideoFrame { url, host: None })
    }

    /// Requests the first frame of a video authenticated by `host`.
    #[must_use]
    pub fn video_with_host(url: Url, host: Arc<dyn MediaHost>) -> Self {
        Self::from_source(ImageSource::VideoFrame {
            url,
            host: Some(host),
        })
    }

    /// Replaces the options.
    #[must_use]
    pub const fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    fn from_source(source: ImageSource) -> Self {
        Self {
            source,
            options: RequestOptions::default(),
        }
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    /// In-memory cache.
    MemoryCache,
    /// Persistent immutable store.
    PersistentStore,
    /// Downloaded (possibly answered by the HTTP response cache).
    Network,
    /// Extracted from a video.
    VideoFrame,
}

impl std::fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::PersistentStore => write!(f, "store"),
            Self::Network => write!(f, "network"),
            Self::VideoFrame => write!(f, "video"),
        }
    }
}

/// A decoded image together with the tier that produced it.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The decoded image.
    pub image: Arc<DynamicImage>,
    /// Where it came from.
    pub origin: ImageOrigin,
}
