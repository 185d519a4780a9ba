//! HTTP transport built on reqwest.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{
    CACHE_CONTROL, CONTENT_TYPE, ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, trace, warn};

use super::response_cache::{CachedResponse, ResponseCache, ResponseMeta};
use crate::domain::entities::TransportRequest;
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::{ImageTransport, SessionPair, TransportResponse};
use crate::infrastructure::config::DownloaderConfig;

/// Transport for `http(s)://` and `file://` URLs, optionally backed by a
/// response cache.
pub struct HttpSession {
    client: Client,
    cache: Option<Arc<ResponseCache>>,
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl HttpSession {
    /// Creates a session without response caching.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn uncached(config: &DownloaderConfig) -> ImageResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            cache: None,
        })
    }

    /// Creates a session backed by `cache`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn cached(config: &DownloaderConfig, cache: Arc<ResponseCache>) -> ImageResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            cache: Some(cache),
        })
    }

    /// Builds the uncached/cached session pair described by `config`.
    ///
    /// # Errors
    /// Returns error if a client or the response cache directory cannot be
    /// created.
    pub async fn pair(config: &DownloaderConfig) -> ImageResult<SessionPair> {
        let cache = ResponseCache::new(
            config.response_cache_dir(),
            config.response_cache_memory_bytes,
            config.response_cache_disk_bytes,
        )
        .await?;

        Ok(SessionPair::new(
            Arc::new(Self::uncached(config)?),
            Arc::new(Self::cached(config, Arc::new(cache))?),
        ))
    }

    async fn perform_file(url: &Url) -> ImageResult<TransportResponse> {
        let path = url
            .to_file_path()
            .map_err(|()| ImageError::transport(format!("Invalid file URL: {url}")))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ImageError::transport(format!("Failed to read {}: {e}", path.display())))?;

        Ok(TransportResponse::local(bytes))
    }

    async fn perform_http(
        &self,
        url: &Url,
        request: &TransportRequest,
    ) -> ImageResult<TransportResponse> {
        let cached = match &self.cache {
            Some(cache) => cache.get(url.as_str()).await,
            None => None,
        };

        if let Some(entry) = &cached
            && entry.meta.is_fresh(Utc::now())
        {
            trace!(url = %url, "Serving fresh response from cache");
            return Ok(from_cached(entry.clone()));
        }

        let mut builder = self.client.get(url.clone()).headers(request.headers.clone());
        if let Some(entry) = &cached {
            if let Some(etag) = &entry.meta.etag {
                builder = builder.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.meta.last_modified {
                builder = builder.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ImageError::transport(format!("Request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED
            && let Some(entry) = cached
        {
            debug!(url = %url, "Cached response revalidated");
            let entry = refreshed(entry, response.headers());
            if let Some(cache) = &self.cache
                && let Err(e) = cache.put(url.as_str(), entry.clone()).await
            {
                warn!(url = %url, error = %e, "Failed to refresh cached response");
            }
            return Ok(from_cached(entry));
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ImageError::transport(format!("Failed to read body: {e}")))?;

        let content_type = header_string(&headers, CONTENT_TYPE);

        if let Some(cache) = &self.cache
            && status.is_success()
            && !is_no_store(&headers)
        {
            let meta = ResponseMeta {
                status: status.as_u16(),
                etag: header_string(&headers, ETAG),
                last_modified: header_string(&headers, LAST_MODIFIED),
                content_type: content_type.clone(),
                max_age: max_age(&headers),
                stored_at: Utc::now(),
            };
            // Without validators or a lifetime the entry could never be reused.
            if meta.has_validators() || meta.max_age.is_some() {
                let entry = CachedResponse {
                    meta,
                    body: body.clone(),
                };
                if let Err(e) = cache.put(url.as_str(), entry).await {
                    warn!(url = %url, error = %e, "Failed to store response");
                }
            } else {
                trace!(url = %url, "Response has no validators or max-age, not caching");
            }
        }

        Ok(TransportResponse {
            body,
            status: Some(status.as_u16()),
            content_type,
        })
    }
}

#[async_trait]
impl ImageTransport for HttpSession {
    async fn perform(&self, request: &TransportRequest) -> ImageResult<TransportResponse> {
        let url = request
            .url
            .as_ref()
            .ok_or_else(|| ImageError::transport("Request has no URL"))?;

        match url.scheme() {
            "file" => Self::perform_file(url).await,
            "http" | "https" => self.perform_http(url, request).await,
            scheme => Err(ImageError::transport(format!(
                "Unsupported URL scheme: {scheme}"
            ))),
        }
    }

    async fn clear_cache(&self) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.clear().await
        {
            warn!(error = %e, "Failed to clear response cache");
        }
    }
}

fn build_client(config: &DownloaderConfig) -> ImageResult<Client> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout());
    if !config.use_system_proxy {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|e| ImageError::transport(format!("Failed to create HTTP client: {e}")))
}

fn from_cached(entry: CachedResponse) -> TransportResponse {
    TransportResponse {
        body: entry.body,
        status: Some(entry.meta.status),
        content_type: entry.meta.content_type,
    }
}

/// Applies the headers of a `304 Not Modified` to a stored entry and restarts
/// its freshness lifetime.
fn refreshed(mut entry: CachedResponse, headers: &HeaderMap) -> CachedResponse {
    if let Some(etag) = header_string(headers, ETAG) {
        entry.meta.etag = Some(etag);
    }
    if let Some(last_modified) = header_string(headers, LAST_MODIFIED) {
        entry.meta.last_modified = Some(last_modified);
    }
    if headers.contains_key(CACHE_CONTROL) {
        entry.meta.max_age = max_age(headers);
    }
    entry.meta.stored_at = Utc::now();
    entry
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn cache_directives(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
}

fn is_no_store(headers: &HeaderMap) -> bool {
    cache_directives(headers).any(|d| d == "no-store")
}

fn max_age(headers: &HeaderMap) -> Option<i64> {
    let mut no_cache = false;
    let mut age = None;
    for directive in cache_directives(headers) {
        if directive == "no-cache" {
            no_cache = true;
        } else if let Some(value) = directive.strip_prefix("max-age=") {
            age = value.trim_matches('"').parse().ok();
        }
    }
    if no_cache { None } else { age }
}
