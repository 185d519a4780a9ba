//! Media host (request signing) port definition.

use async_trait::async_trait;
use reqwest::Url;

use crate::domain::entities::{TransportRequest, VideoAsset};
use crate::domain::errors::ImageResult;

/// Turns plain URLs into authenticated requests for a private host.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Builds an authenticated request for an image URL.
    async fn authenticated_request(&self, url: &Url) -> ImageResult<TransportRequest>;

    /// Builds an authenticated asset for a video URL.
    async fn authenticated_asset(&self, url: &Url) -> ImageResult<VideoAsset>;
}
