//! Image downloader facade.
//!
//! Lookup order: memory cache, persistent store, then network (or video frame
//! extraction). Network fetches are deduplicated by the [`FetchCoordinator`].

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use image::DynamicImage;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::application::services::FetchCoordinator;
use crate::domain::entities::{
    CacheKey, ImageOrigin, ImageRequest, ImageSize, ImageSource, LoadedImage, RequestOptions,
    TransportRequest, VideoAsset,
};
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::{
    CacheStats, FrameExtractor, ImageDecoderPort, MediaHost, MemoryCachePort, SessionPair,
};
use crate::infrastructure::config::DownloaderConfig;

use super::decoder::RasterDecoder;
use super::http_session::HttpSession;
use super::immutable_store::ImmutableStore;
use super::memory_cache::MemoryImageCache;

/// Downloads, decodes and caches images.
///
/// Share one instance behind an `Arc`; every method takes `&self`.
pub struct ImageDownloader {
    memory_cache: Arc<dyn MemoryCachePort>,
    store: ImmutableStore,
    coordinator: FetchCoordinator,
    decoder: Arc<dyn ImageDecoderPort>,
    frame_extractor: Option<Arc<dyn FrameExtractor>>,
}

impl std::fmt::Debug for ImageDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDownloader")
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .field("video", &self.frame_extractor.is_some())
            .finish_non_exhaustive()
    }
}

impl ImageDownloader {
    /// Creates a downloader with HTTP sessions, caches and store configured
    /// from `config`.
    ///
    /// # Errors
    /// Returns error if the HTTP clients cannot be built.
    pub async fn new(config: &DownloaderConfig) -> ImageResult<Self> {
        let sessions = HttpSession::pair(config).await?;
        info!(
            cache_dir = %config.effective_cache_dir().display(),
            memory_capacity = config.memory_cache_capacity,
            "Image downloader ready"
        );
        Self::builder()
            .memory_cache(Arc::new(MemoryImageCache::new(config.memory_cache_capacity)))
            .store(ImmutableStore::new(config.effective_cache_dir()))
            .sessions(sessions)
            .build()
    }

    /// Returns a builder for custom wiring.
    #[must_use]
    pub fn builder() -> ImageDownloaderBuilder {
        ImageDownloaderBuilder::default()
    }

    /// Returns the fetch coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Returns the persistent store.
    #[must_use]
    pub const fn store(&self) -> &ImmutableStore {
        &self.store
    }

    /// Loads an image for `url`.
    ///
    /// # Errors
    /// See [`image`](Self::image).
    pub async fn image_from_url(
        &self,
        url: Url,
        host: Option<Arc<dyn MediaHost>>,
        options: RequestOptions,
    ) -> ImageResult<Arc<DynamicImage>> {
        let request = ImageRequest {
            source: ImageSource::Remote { url, host },
            options,
        };
        self.image(&request).await
    }

    /// Loads an image, consulting the caches first.
    ///
    /// # Errors
    /// Returns the first failure among authentication, transport, status
    /// validation, decoding and persisting. Nothing is cached on failure.
    pub async fn image(&self, request: &ImageRequest) -> ImageResult<Arc<DynamicImage>> {
        self.load(request).await.map(|loaded| loaded.image)
    }

    /// Like [`image`](Self::image), but gives up with
    /// `ImageError::Cancelled` once `token` is cancelled.
    ///
    /// # Errors
    /// See [`image`](Self::image).
    pub async fn image_cancellable(
        &self,
        request: &ImageRequest,
        token: &CancellationToken,
    ) -> ImageResult<Arc<DynamicImage>> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(ImageError::Cancelled),
            result = self.image(request) => result,
        }
    }

    /// Loads an image and reports which tier produced it.
    ///
    /// # Errors
    /// See [`image`](Self::image).
    pub async fn load(&self, request: &ImageRequest) -> ImageResult<LoadedImage> {
        let options = request.options;
        let key = CacheKey::make(request.source.url(), options.size);

        if let Some(loaded) = self.lookup(&key, &options).await? {
            return Ok(loaded);
        }

        let (image, origin) = match &request.source {
            ImageSource::VideoFrame { url, host } => {
                let frame = self.video_frame(url, host.as_ref(), options.size).await?;
                (frame, ImageOrigin::VideoFrame)
            }
            ImageSource::Remote { .. } | ImageSource::Prepared(_) => {
                let bytes = self.data(request).await?;
                let image = self.decoder.decode(bytes, options.size).await?;
                (image, ImageOrigin::Network)
            }
        };

        let image = Arc::new(image);
        self.store_image(&image, key, &options).await?;

        debug!(
            origin = %origin,
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );
        Ok(LoadedImage { image, origin })
    }

    /// Fetches the raw bytes behind a request without decoding or caching
    /// them.
    ///
    /// # Errors
    /// Returns `ImageError::Decode` for video sources, otherwise the
    /// authentication or fetch error.
    pub async fn data(&self, request: &ImageRequest) -> ImageResult<Bytes> {
        let transport_request = transport_request(&request.source).await?;
        self.coordinator
            .fetch_bytes(&transport_request, &request.options)
            .await
    }

    /// Returns the memory-cached image for a request, if any.
    #[must_use]
    pub fn cached_image(&self, request: &ImageRequest) -> Option<Arc<DynamicImage>> {
        let url = request.source.url()?;
        self.cached_image_for_url(url, request.options.size)
    }

    /// Returns the memory-cached image for `url` at `size`, if any.
    #[must_use]
    pub fn cached_image_for_url(
        &self,
        url: &Url,
        size: Option<ImageSize>,
    ) -> Option<Arc<DynamicImage>> {
        self.memory_cache.get(&CacheKey::make(Some(url), size))
    }

    /// Inserts an image into the memory cache, or removes it with `None`.
    pub fn set_cached_image(
        &self,
        image: Option<Arc<DynamicImage>>,
        url: &Url,
        size: Option<ImageSize>,
    ) {
        self.memory_cache.set(CacheKey::make(Some(url), size), image);
    }

    /// Empties the memory cache. The persistent store is untouched.
    pub fn clear_memory_cache(&self) {
        self.memory_cache.remove_all();
        info!("Cleared memory image cache");
    }

    /// Drops every cached HTTP response in both sessions. The persistent
    /// store is untouched.
    pub async fn clear_transport_cache(&self) {
        self.coordinator.sessions().clear_caches().await;
        info!("Cleared HTTP response caches");
    }

    /// Loads the requests concurrently to warm the caches.
    /// Returns the number of images that loaded.
    pub async fn prefetch(&self, requests: Vec<ImageRequest>) -> usize {
        let total = requests.len();
        let results = join_all(requests.iter().map(|request| self.image(request))).await;

        let mut loaded = 0;
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(_) => loaded += 1,
                Err(e) => {
                    warn!(
                        source = ?request.source,
                        network = e.is_network_error(),
                        error = %e,
                        "Prefetch failed"
                    );
                }
            }
        }
        debug!(loaded, total, "Prefetch finished");
        loaded
    }

    /// Memory cache statistics, when the cache keeps them.
    #[must_use]
    pub fn memory_cache_stats(&self) -> Option<CacheStats> {
        self.memory_cache.stats()
    }

    /// Memory cache, then persistent store.
    async fn lookup(
        &self,
        key: &CacheKey,
        options: &RequestOptions,
    ) -> ImageResult<Option<LoadedImage>> {
        if options.memory_cache_enabled
            && let Some(image) = self.memory_cache.get(key)
        {
            trace!(key = %key, "Memory cache hit");
            return Ok(Some(LoadedImage {
                image,
                origin: ImageOrigin::MemoryCache,
            }));
        }

        if !options.disk_cache_enabled {
            return Ok(None);
        }

        let Some(bytes) = self.store.read(key).await? else {
            trace!(key = %key, "Persistent store miss");
            return Ok(None);
        };

        // Stored images are returned at their stored size.
        match self.decoder.decode(bytes, None).await {
            Ok(image) => {
                trace!(key = %key, "Persistent store hit");
                Ok(Some(LoadedImage {
                    image: Arc::new(image),
                    origin: ImageOrigin::PersistentStore,
                }))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable file in persistent store, refetching");
                Ok(None)
            }
        }
    }

    /// Persistent store first, then memory, so a failed write caches nothing.
    async fn store_image(
        &self,
        image: &Arc<DynamicImage>,
        key: CacheKey,
        options: &RequestOptions,
    ) -> ImageResult<()> {
        if options.persists_immutably() {
            let png = self.decoder.encode(Arc::clone(image)).await?;
            self.store.write(&key, &png).await?;
            debug!(key = %key, bytes = png.len(), "Stored image");
        }

        if options.memory_cache_enabled {
            self.memory_cache.set(key, Some(Arc::clone(image)));
        }
        Ok(())
    }

    async fn video_frame(
        &self,
        url: &Url,
        host: Option<&Arc<dyn MediaHost>>,
        size: Option<ImageSize>,
    ) -> ImageResult<DynamicImage> {
        let Some(extractor) = &self.frame_extractor else {
            return Err(ImageError::decode("video frames are not supported"));
        };

        let asset = match host {
            Some(host) => host.authenticated_asset(url).await?,
            None => VideoAsset::new(url.clone()),
        };

        debug!(url = %url, "Extracting video frame");
        extractor.extract_frame(&asset, size).await
    }
}

/// Builds the transport request for an image source.
async fn transport_request(source: &ImageSource) -> ImageResult<TransportRequest> {
    match source {
        ImageSource::Remote { url, host } => {
            let request = match host {
                Some(host) => host.authenticated_request(url).await?,
                None => TransportRequest::new(url.clone()),
            };
            Ok(request.accepting_images())
        }
        ImageSource::Prepared(request) => Ok(request.clone()),
        ImageSource::VideoFrame { .. } => Err(ImageError::decode(
            "video sources have no byte representation",
        )),
    }
}

/// Builder for [`ImageDownloader`].
#[derive(Default)]
pub struct ImageDownloaderBuilder {
    memory_cache: Option<Arc<dyn MemoryCachePort>>,
    store: Option<ImmutableStore>,
    sessions: Option<SessionPair>,
    decoder: Option<Arc<dyn ImageDecoderPort>>,
    frame_extractor: Option<Arc<dyn FrameExtractor>>,
}

impl std::fmt::Debug for ImageDownloaderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDownloaderBuilder")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ImageDownloaderBuilder {
    /// Sets the memory cache. Defaults to a [`MemoryImageCache`].
    #[must_use]
    pub fn memory_cache(mut self, cache: Arc<dyn MemoryCachePort>) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    /// Sets the persistent store. Defaults to the platform cache directory.
    #[must_use]
    pub fn store(mut self, store: ImmutableStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the transport sessions. Defaults to a single uncached HTTP
    /// session.
    #[must_use]
    pub fn sessions(mut self, sessions: SessionPair) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the decoder. Defaults to [`RasterDecoder`].
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoderPort>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Enables video sources.
    #[must_use]
    pub fn frame_extractor(mut self, extractor: Arc<dyn FrameExtractor>) -> Self {
        self.frame_extractor = Some(extractor);
        self
    }

    /// Builds the downloader.
    ///
    /// # Errors
    /// Returns error if the default HTTP session cannot be built.
    pub fn build(self) -> ImageResult<ImageDownloader> {
        let sessions = match self.sessions {
            Some(sessions) => sessions,
            None => SessionPair::single(Arc::new(HttpSession::uncached(
                &DownloaderConfig::default(),
            )?)),
        };

        Ok(ImageDownloader {
            memory_cache: self
                .memory_cache
                .unwrap_or_else(|| Arc::new(MemoryImageCache::with_default_capacity())),
            store: self.store.unwrap_or_else(ImmutableStore::default_location),
            coordinator: FetchCoordinator::new(sessions),
            decoder: self
                .decoder
                .unwrap_or_else(|| Arc::new(RasterDecoder::new())),
            frame_extractor: self.frame_extractor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::GenericImageView;
    use reqwest::header::{ACCEPT, AUTHORIZATION};
    use tempfile::TempDir;

    use crate::domain::entities::ResourceMutability;
    use crate::domain::ports::TransportResponse;
    use crate::domain::ports::mocks::{
        MockFrameExtractor, MockMediaHost, MockTransport, png_bytes,
    };

    const URL: &str = "https://x/a.png";

    struct Harness {
        downloader: Arc<ImageDownloader>,
        transport: Arc<MockTransport>,
        extractor: Arc<MockFrameExtractor>,
        temp: TempDir,
    }

    impl Harness {
        fn new(transport: MockTransport) -> Self {
            let temp = TempDir::new().unwrap();
            let transport = Arc::new(transport);
            let extractor = Arc::new(MockFrameExtractor::new(ImageSize::new(640, 360)));
            let downloader = ImageDownloader::builder()
                .memory_cache(Arc::new(MemoryImageCache::new(16)))
                .store(ImmutableStore::new(temp.path()))
                .sessions(SessionPair::single(transport.clone()))
                .frame_extractor(extractor.clone())
                .build()
                .unwrap();
            Self {
                downloader: Arc::new(downloader),
                transport,
                extractor,
                temp,
            }
        }

        fn store(&self) -> ImmutableStore {
            ImmutableStore::new(self.temp.path())
        }

        fn stored_files(&self) -> usize {
            std::fs::read_dir(self.store().root())
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn sized(size: ImageSize) -> RequestOptions {
        RequestOptions::default().with_size(size)
    }

    fn immutable() -> RequestOptions {
        RequestOptions::default().with_mutability(ResourceMutability::Immutable)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_second_load_is_served_from_memory() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url(url(URL));

        let first = h.downloader.load(&request).await.unwrap();
        let second = h.downloader.load(&request).await.unwrap();

        assert_eq!(first.origin, ImageOrigin::Network);
        assert_eq!(second.origin, ImageOrigin::MemoryCache);
        assert!(Arc::ptr_eq(&first.image, &second.image));
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_network_image_is_downscaled_and_cached_by_size() {
        let h = Harness::new(MockTransport::new());
        let size = ImageSize::new(100, 100);
        let request = ImageRequest::url(url(URL)).with_options(sized(size));

        let image = h.downloader.image(&request).await.unwrap();

        assert_eq!(image.dimensions(), (100, 50));
        assert!(h.downloader.cached_image_for_url(&url(URL), Some(size)).is_some());
        assert!(h.downloader.cached_image_for_url(&url(URL), None).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_affect_concurrent_caller() {
        let h = Harness::new(MockTransport::gated());
        let request = ImageRequest::url(url(URL)).with_options(sized(ImageSize::new(100, 100)));

        let spawn_load = || {
            let downloader = h.downloader.clone();
            let request = request.clone();
            tokio::spawn(async move { downloader.image(&request).await })
        };
        let a = spawn_load();
        let b = spawn_load();
        wait_until(|| h.downloader.coordinator().subscriber_count(URL) == 2).await;

        a.abort();
        assert!(a.await.unwrap_err().is_cancelled());

        h.transport.open();
        let image = b.await.unwrap().unwrap();
        assert_eq!(image.dimensions(), (100, 50));
        assert_eq!(h.transport.calls(), 1);
        assert_eq!(h.transport.abandoned(), 0);
    }

    #[tokio::test]
    async fn test_same_url_different_sizes_share_fetch_but_not_cache_entries() {
        let h = Harness::new(MockTransport::gated());
        let large = ImageSize::new(100, 100);
        let small = ImageSize::new(50, 50);

        let spawn_load = |size| {
            let downloader = h.downloader.clone();
            let request = ImageRequest::url(url(URL)).with_options(sized(size));
            tokio::spawn(async move { downloader.image(&request).await })
        };
        let a = spawn_load(large);
        let b = spawn_load(small);
        wait_until(|| h.downloader.coordinator().subscriber_count(URL) == 2).await;

        h.transport.open();
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(h.transport.calls(), 1);
        let cached_large = h.downloader.cached_image_for_url(&url(URL), Some(large)).unwrap();
        let cached_small = h.downloader.cached_image_for_url(&url(URL), Some(small)).unwrap();
        assert_eq!(cached_large.dimensions(), (100, 50));
        assert_eq!(cached_small.dimensions(), (50, 25));
    }

    #[tokio::test]
    async fn test_mutable_images_are_never_persisted() {
        let h = Harness::new(MockTransport::new());

        h.downloader.image(&ImageRequest::url(url(URL))).await.unwrap();

        let key = CacheKey::make(Some(&url(URL)), None);
        assert!(!h.store().contains(&key).await);
        assert_eq!(h.stored_files(), 0);
    }

    #[tokio::test]
    async fn test_immutable_image_is_persisted_once_and_served_from_store() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url(url(URL)).with_options(immutable());

        h.downloader.image(&request).await.unwrap();
        assert_eq!(h.stored_files(), 1);

        h.downloader.clear_memory_cache();
        let loaded = h.downloader.load(&request).await.unwrap();

        assert_eq!(loaded.origin, ImageOrigin::PersistentStore);
        assert_eq!(loaded.image.dimensions(), (200, 100));
        assert_eq!(h.transport.calls(), 1);
        assert_eq!(h.stored_files(), 1);
    }

    #[tokio::test]
    async fn test_store_hit_is_not_resized() {
        let h = Harness::new(MockTransport::new());
        let size = ImageSize::new(50, 50);
        let key = CacheKey::make(Some(&url(URL)), Some(size));
        h.store().write(&key, &png_bytes(200, 100)).await.unwrap();

        let loaded = h
            .downloader
            .load(&ImageRequest::url(url(URL)).with_options(sized(size)))
            .await
            .unwrap();

        assert_eq!(loaded.origin, ImageOrigin::PersistentStore);
        assert_eq!(loaded.image.dimensions(), (200, 100));
        assert_eq!(h.transport.calls(), 0);
        assert!(h.downloader.cached_image_for_url(&url(URL), Some(size)).is_none());
    }

    #[tokio::test]
    async fn test_store_is_skipped_when_disk_cache_disabled() {
        let h = Harness::new(MockTransport::new());
        let key = CacheKey::make(Some(&url(URL)), None);
        h.store().write(&key, &png_bytes(10, 10)).await.unwrap();

        let loaded = h
            .downloader
            .load(
                &ImageRequest::url(url(URL))
                    .with_options(RequestOptions::default().with_disk_cache(false)),
            )
            .await
            .unwrap();

        assert_eq!(loaded.origin, ImageOrigin::Network);
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_store_file_falls_back_to_network() {
        let h = Harness::new(MockTransport::new());
        let key = CacheKey::make(Some(&url(URL)), None);
        h.store().write(&key, b"corrupt").await.unwrap();

        let loaded = h.downloader.load(&ImageRequest::url(url(URL))).await.unwrap();

        assert_eq!(loaded.origin, ImageOrigin::Network);
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_memory_cache_disabled_always_fetches() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url(url(URL))
            .with_options(RequestOptions::default().with_memory_cache(false));

        h.downloader.image(&request).await.unwrap();
        h.downloader.image(&request).await.unwrap();

        assert_eq!(h.transport.calls(), 2);
        assert!(h.downloader.cached_image_for_url(&url(URL), None).is_none());
    }

    #[tokio::test]
    async fn test_bad_status_fails_and_caches_nothing() {
        let h = Harness::new(MockTransport::new());
        h.transport
            .respond(URL, Ok(TransportResponse::http(404, Bytes::new())));
        let request = ImageRequest::url(url(URL)).with_options(immutable());

        let err = h.downloader.image(&request).await.unwrap_err();

        assert_eq!(err, ImageError::UnacceptableStatus(404));
        assert!(h.downloader.cached_image(&request).is_none());
        assert_eq!(h.stored_files(), 0);
    }

    #[tokio::test]
    async fn test_no_content_status_is_accepted() {
        let h = Harness::new(MockTransport::new());
        h.transport
            .respond(URL, Ok(TransportResponse::http(204, png_bytes(8, 8))));

        let image = h.downloader.image(&ImageRequest::url(url(URL))).await.unwrap();
        assert_eq!(image.dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn test_undecodable_body_fails_and_caches_nothing() {
        let h = Harness::new(MockTransport::new());
        h.transport.respond(
            URL,
            Ok(TransportResponse::http(200, Bytes::from_static(b"<html>"))),
        );
        let request = ImageRequest::url(url(URL));

        let err = h.downloader.image(&request).await.unwrap_err();

        assert!(matches!(err, ImageError::Decode(_)));
        assert!(h.downloader.cached_image(&request).is_none());
    }

    #[tokio::test]
    async fn test_remote_request_accepts_images_and_is_authenticated() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url_with_host(url(URL), Arc::new(MockMediaHost::new()));

        h.downloader.image(&request).await.unwrap();

        let seen = h.transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers.get(ACCEPT).unwrap(), "image/*");
        assert_eq!(seen[0].headers.get(AUTHORIZATION).unwrap(), "Bearer mock");
    }

    #[tokio::test]
    async fn test_prepared_request_is_sent_as_is() {
        let h = Harness::new(MockTransport::new());
        let prepared = TransportRequest::new(url(URL));

        h.downloader
            .image(&ImageRequest::prepared(prepared))
            .await
            .unwrap();

        assert!(h.transport.seen()[0].headers.get(ACCEPT).is_none());
    }

    #[tokio::test]
    async fn test_expired_host_fails_before_fetching() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url_with_host(url(URL), Arc::new(MockMediaHost::expired()));

        let err = h.downloader.image(&request).await.unwrap_err();

        assert!(matches!(err, ImageError::Authentication(_)));
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_video_frame_is_extracted_and_cached() {
        let h = Harness::new(MockTransport::new());
        let size = ImageSize::new(320, 320);
        let request = ImageRequest::video_with_host(
            url("https://x/clip.mp4"),
            Arc::new(MockMediaHost::new()),
        )
        .with_options(sized(size));

        let loaded = h.downloader.load(&request).await.unwrap();

        assert_eq!(loaded.origin, ImageOrigin::VideoFrame);
        assert_eq!(loaded.image.dimensions(), (320, 320));
        assert_eq!(h.transport.calls(), 0);
        assert!(h.downloader.cached_image(&request).is_some());

        let seen = h.extractor.seen();
        assert_eq!(seen.len(), 1);
        let (asset, max_size) = &seen[0];
        assert_eq!(asset.url, url("https://x/clip.mp4"));
        assert_eq!(asset.headers.get(AUTHORIZATION).unwrap(), "Bearer mock");
        assert_eq!(*max_size, Some(size));
    }

    #[tokio::test]
    async fn test_video_without_host_uses_plain_asset() {
        let h = Harness::new(MockTransport::new());

        h.downloader
            .image(&ImageRequest::video(url("https://x/clip.mp4")))
            .await
            .unwrap();

        let seen = h.extractor.seen();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.headers.is_empty());
        assert_eq!(seen[0].1, None);
    }

    #[tokio::test]
    async fn test_video_with_expired_host_fails_before_extracting() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::video_with_host(
            url("https://x/clip.mp4"),
            Arc::new(MockMediaHost::expired()),
        );

        let err = h.downloader.image(&request).await.unwrap_err();

        assert!(matches!(err, ImageError::Authentication(_)));
        assert!(h.extractor.seen().is_empty());
        assert!(h.downloader.cached_image(&request).is_none());
    }

    #[tokio::test]
    async fn test_video_without_extractor_fails() {
        let temp = TempDir::new().unwrap();
        let downloader = ImageDownloader::builder()
            .store(ImmutableStore::new(temp.path()))
            .sessions(SessionPair::single(Arc::new(MockTransport::new())))
            .build()
            .unwrap();

        let err = downloader
            .image(&ImageRequest::video(url("https://x/clip.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[tokio::test]
    async fn test_data_returns_raw_bytes_without_caching() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url(url(URL));

        let bytes = h.downloader.data(&request).await.unwrap();

        assert_eq!(bytes, png_bytes(200, 100));
        assert!(h.downloader.cached_image(&request).is_none());

        let err = h
            .downloader
            .data(&ImageRequest::video(url("https://x/clip.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[tokio::test]
    async fn test_cancellation_token_aborts_load() {
        let h = Harness::new(MockTransport::gated());
        let token = CancellationToken::new();
        let request = ImageRequest::url(url(URL));

        let task = {
            let downloader = h.downloader.clone();
            let request = request.clone();
            let token = token.clone();
            tokio::spawn(async move { downloader.image_cancellable(&request, &token).await })
        };
        h.transport.wait_for_calls(1).await;
        token.cancel();

        assert_eq!(task.await.unwrap().unwrap_err(), ImageError::Cancelled);
        assert!(h.downloader.cached_image(&request).is_none());
        wait_until(|| h.transport.abandoned() == 1).await;
        assert_eq!(h.downloader.coordinator().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_cache_access() {
        let h = Harness::new(MockTransport::new());
        let image = Arc::new(DynamicImage::new_rgb8(4, 4));

        h.downloader.set_cached_image(Some(image.clone()), &url(URL), None);
        let request = ImageRequest::url(url(URL));
        assert!(Arc::ptr_eq(&h.downloader.cached_image(&request).unwrap(), &image));

        let loaded = h.downloader.load(&request).await.unwrap();
        assert_eq!(loaded.origin, ImageOrigin::MemoryCache);

        h.downloader.set_cached_image(None, &url(URL), None);
        assert!(h.downloader.cached_image(&request).is_none());
    }

    #[tokio::test]
    async fn test_cached_image_without_url_is_none() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::prepared(TransportRequest::default());
        assert!(h.downloader.cached_image(&request).is_none());
    }

    #[tokio::test]
    async fn test_clear_memory_cache_keeps_store() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url(url(URL)).with_options(immutable());

        h.downloader.image(&request).await.unwrap();
        h.downloader.clear_memory_cache();

        assert!(h.downloader.cached_image(&request).is_none());
        assert_eq!(h.stored_files(), 1);
    }

    #[tokio::test]
    async fn test_clear_transport_cache_clears_both_sessions() {
        let h = Harness::new(MockTransport::new());
        h.downloader.clear_transport_cache().await;
        assert_eq!(h.transport.clears(), 2);
    }

    #[tokio::test]
    async fn test_prefetch_counts_successes() {
        let h = Harness::new(MockTransport::new());
        h.transport.respond(
            "https://x/missing.png",
            Ok(TransportResponse::http(404, Bytes::new())),
        );

        let loaded = h
            .downloader
            .prefetch(vec![
                ImageRequest::url(url("https://x/a.png")),
                ImageRequest::url(url("https://x/b.png")),
                ImageRequest::url(url("https://x/missing.png")),
            ])
            .await;

        assert_eq!(loaded, 2);
        assert!(h.downloader.cached_image_for_url(&url("https://x/b.png"), None).is_some());
    }

    #[tokio::test]
    async fn test_memory_cache_stats() {
        let h = Harness::new(MockTransport::new());
        let request = ImageRequest::url(url(URL));

        h.downloader.image(&request).await.unwrap();
        h.downloader.image(&request).await.unwrap();

        let stats = h.downloader.memory_cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_new_from_config_loads_file_urls() {
        let temp = TempDir::new().unwrap();
        let config = DownloaderConfig {
            cache_dir: Some(temp.path().join("cache")),
            use_system_proxy: false,
            ..DownloaderConfig::default()
        };
        let downloader = ImageDownloader::new(&config).await.unwrap();

        let path = temp.path().join("local.png");
        std::fs::write(&path, png_bytes(12, 6)).unwrap();
        let request = ImageRequest::url(Url::from_file_path(&path).unwrap())
            .with_options(immutable());

        let loaded = downloader.load(&request).await.unwrap();

        assert_eq!(loaded.origin, ImageOrigin::Network);
        assert_eq!(loaded.image.dimensions(), (12, 6));
        assert!(
            downloader
                .store()
                .root()
                .starts_with(temp.path().join("cache"))
        );
    }
}
