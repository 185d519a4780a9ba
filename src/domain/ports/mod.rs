mod decoder_port;
mod media_host_port;
mod memory_cache_port;
mod transport_port;

pub use decoder_port::{FrameExtractor, ImageDecoderPort};
pub use media_host_port::MediaHost;
pub use memory_cache_port::{CacheStats, MemoryCachePort};
pub use transport_port::{ImageTransport, SessionPair, TransportResponse};

#[cfg(test)]
pub mod mocks {
    pub use super::decoder_port::mock::MockFrameExtractor;
    pub use super::media_host_port::mock::MockMediaHost;
    pub use super::transport_port::mock::{MockTransport, png_bytes};
}
