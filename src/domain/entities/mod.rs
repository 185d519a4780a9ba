//! Domain entity definitions.

mod cache_key;
mod image_request;
mod transport_request;

pub use cache_key::CacheKey;
pub use image_request::{
    ImageOrigin, ImageRequest, ImageSize, ImageSource, LoadedImage, RequestOptions,
    ResourceMutability,
};
pub use transport_request::{TransportRequest, VideoAsset};
