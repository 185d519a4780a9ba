//! Raster decoding and downscaling on the blocking pool.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::domain::entities::ImageSize;
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::ImageDecoderPort;

/// Decoder for PNG, JPEG and WebP. Persists images as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

impl RasterDecoder {
    /// Creates the decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Downscales `img` to fit inside `size`, keeping the aspect ratio.
/// Images already within bounds are returned untouched; never upscales.
#[must_use]
pub fn fit_within(img: DynamicImage, size: ImageSize) -> DynamicImage {
    if size.width == 0 || size.height == 0 {
        return img;
    }
    if img.width() <= size.width && img.height() <= size.height {
        return img;
    }
    img.resize(size.width, size.height, FilterType::Lanczos3)
}

#[async_trait]
impl ImageDecoderPort for RasterDecoder {
    async fn decode(&self, bytes: Bytes, size: Option<ImageSize>) -> ImageResult<DynamicImage> {
        tokio::task::spawn_blocking(move || -> ImageResult<DynamicImage> {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| ImageError::decode(format!("Failed to decode image: {e}")))?;
            Ok(match size {
                Some(size) => fit_within(img, size),
                None => img,
            })
        })
        .await
        .map_err(|e| ImageError::decode(format!("Decode task panicked: {e}")))?
    }

    async fn encode(&self, image: Arc<DynamicImage>) -> ImageResult<Bytes> {
        tokio::task::spawn_blocking(move || -> ImageResult<Bytes> {
            let mut out = Cursor::new(Vec::new());
            image
                .write_to(&mut out, ImageFormat::Png)
                .map_err(|e| ImageError::decode(format!("Failed to encode image: {e}")))?;
            Ok(Bytes::from(out.into_inner()))
        })
        .await
        .map_err(|e| ImageError::decode(format!("Encode task panicked: {e}")))?
    }
}
