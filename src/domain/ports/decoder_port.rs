//! Decode/resize and frame extraction ports.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;

use crate::domain::entities::{ImageSize, VideoAsset};
use crate::domain::errors::ImageResult;

/// Turns encoded bytes into images and back.
#[async_trait]
pub trait ImageDecoderPort: Send + Sync {
    /// Decodes `bytes`, downscaling to fit `size` when given.
    async fn decode(&self, bytes: Bytes, size: Option<ImageSize>) -> ImageResult<DynamicImage>;

    /// Encodes an image for the persistent store.
    async fn encode(&self, image: Arc<DynamicImage>) -> ImageResult<Bytes>;
}

/// Extracts a still frame from a video.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Returns the first frame, constrained to `max_size` when given.
    async fn extract_frame(
        &self,
        asset: &VideoAsset,
        max_size: Option<ImageSize>,
    ) -> ImageResult<DynamicImage>;
}
