//! Transport-level request and asset descriptions.

use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};

/// A request handed to the transport client.
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    /// Target URL. A request without URL has an empty identity.
    pub url: Option<Url>,
    /// Extra request headers.
    pub headers: HeaderMap,
}

impl TransportRequest {
    /// Creates a plain GET request for `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url: Some(url),
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets `Accept: image/*`.
    #[must_use]
    pub fn accepting_images(self) -> Self {
        self.with_header(ACCEPT, HeaderValue::from_static("image/*"))
    }

    /// Identity used to deduplicate concurrent fetches: the URL string,
    /// or empty when absent.
    #[must_use]
    pub fn identity(&self) -> String {
        self.url.as_ref().map(|u| u.as_str().to_string()).unwrap_or_default()
    }
}

/// A video resource handed to the frame extractor.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    /// Video URL.
    pub url: Url,
    /// Headers needed to access the video (e.g. authorization).
    pub headers: HeaderMap,
}

impl VideoAsset {
    /// Creates an unauthenticated asset.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }
}
