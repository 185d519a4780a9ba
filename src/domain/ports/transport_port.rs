//! Transport client port definition.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{RequestOptions, TransportRequest};
use crate::domain::errors::ImageResult;

/// Raw response returned by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Response body.
    pub body: Bytes,
    /// HTTP status, or `None` for non-HTTP transports such as `file://`.
    pub status: Option<u16>,
    /// `Content-Type` header, when known.
    pub content_type: Option<String>,
}

impl TransportResponse {
    /// Creates an HTTP response.
    #[must_use]
    pub fn http(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            status: Some(status),
            content_type: None,
        }
    }

    /// Creates a non-HTTP response (no status to validate).
    #[must_use]
    pub fn local(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            status: None,
            content_type: None,
        }
    }
}

/// Port for performing byte-level requests.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Performs the request. Fails on connectivity errors only; status codes
    /// are validated by the caller.
    async fn perform(&self, request: &TransportRequest) -> ImageResult<TransportResponse>;

    /// Drops every cached response, if the transport caches.
    async fn clear_cache(&self) {}
}

/// The two long-lived sessions: one without response caching, one backed by
/// a bounded response cache.
#[derive(Clone)]
pub struct SessionPair {
    uncached: Arc<dyn ImageTransport>,
    cached: Arc<dyn ImageTransport>,
}

impl SessionPair {
    /// Pairs an uncached and a cached transport.
    #[must_use]
    pub fn new(uncached: Arc<dyn ImageTransport>, cached: Arc<dyn ImageTransport>) -> Self {
        Self { uncached, cached }
    }

    /// Uses the same transport for both roles.
    #[must_use]
    pub fn single(transport: Arc<dyn ImageTransport>) -> Self {
        Self::new(transport.clone(), transport)
    }

    /// Picks the session for a request. Disk caching selects the cached
    /// session regardless of mutability.
    #[must_use]
    pub fn select(&self, options: &RequestOptions) -> &Arc<dyn ImageTransport> {
        if options.disk_cache_enabled {
            &self.cached
        } else {
            &self.uncached
        }
    }

    /// Clears the response caches of both sessions.
    pub async fn clear_caches(&self) {
        self.cached.clear_cache().await;
        self.uncached.clear_cache().await;
    }
}

impl std::fmt::Debug for SessionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPair").finish_non_exhaustive()
    }
}
