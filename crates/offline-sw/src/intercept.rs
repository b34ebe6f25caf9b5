//! Fetch interception: same-origin guard, cache-first lookup, network
//! fallback with progressive caching.

use std::sync::Arc;

use offline_net::{Fetcher, Origin, Request, Response};
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheStore, RequestKey};
use crate::Result;

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Is navigation request.
    pub is_navigation: bool,
}

impl FetchEvent {
    /// A sub-resource request.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            is_navigation: false,
        }
    }

    /// A navigation request.
    pub fn navigation(request: Request) -> Self {
        Self {
            request,
            is_navigation: true,
        }
    }
}

/// How a fetch event was answered.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request unchanged.
    Passthrough(Request),
    /// Served from a cache bucket.
    Cached(Response),
    /// Served from the live network.
    Network(Response),
}

impl FetchOutcome {
    /// The substituted response, if the worker answered the request.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Passthrough(_) => None,
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) => Some(r),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough(_) => None,
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) => Some(r),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, FetchOutcome::Cached(_))
    }

    /// Short label for logs and reports.
    pub fn source(&self) -> &'static str {
        match self {
            FetchOutcome::Passthrough(_) => "passthrough",
            FetchOutcome::Cached(_) => "cache",
            FetchOutcome::Network(_) => "network",
        }
    }
}

/// Answers fetch events for one worker.
pub struct RequestInterceptor {
    origin: Origin,
    progressive_bucket: String,
    offline_fallback: Option<RequestKey>,
    caches: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
}

impl RequestInterceptor {
    pub fn new(
        origin: Origin,
        progressive_bucket: impl Into<String>,
        caches: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            origin,
            progressive_bucket: progressive_bucket.into(),
            offline_fallback: None,
            caches,
            network,
        }
    }

    /// Serve this cached page when a navigation fails on the network.
    pub fn with_offline_fallback(mut self, fallback: RequestKey) -> Self {
        self.offline_fallback = Some(fallback);
        self
    }

    /// Handle a fetch event.
    ///
    /// A network rejection is returned unchanged unless an offline fallback
    /// is configured, the request is a navigation, and the fallback is cached.
    pub async fn handle(&self, event: FetchEvent) -> Result<FetchOutcome> {
        let FetchEvent {
            request,
            is_navigation,
        } = event;

        if !self.origin.contains(&request.url) {
            trace!(url = %request.url, "Cross-origin request, not intercepting");
            return Ok(FetchOutcome::Passthrough(request));
        }

        let key = RequestKey::for_request(&request);

        if let Some(ref key) = key {
            match self.caches.match_request(key).await {
                Ok(Some(response)) => {
                    debug!(url = %request.url, "Serving from cache");
                    return Ok(FetchOutcome::Cached(response));
                }
                Ok(None) => {}
                Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
            }
        }

        let url = request.url.clone();
        match self.network.fetch(request).await {
            Ok(response) => {
                if let Some(key) = key {
                    self.store_progressive(key, &response).await;
                }
                debug!(url = %url, status = %response.status, "Serving from network");
                Ok(FetchOutcome::Network(response))
            }
            Err(e) => {
                if is_navigation {
                    if let Some(response) = self.offline_page().await {
                        info!(url = %url, error = %e, "Network failed, serving offline page");
                        return Ok(FetchOutcome::Cached(response));
                    }
                }
                debug!(url = %url, error = %e, "Network fetch failed");
                Err(e.into())
            }
        }
    }

    async fn store_progressive(&self, key: RequestKey, response: &Response) {
        let result = self
            .caches
            .put(&self.progressive_bucket, key.clone(), response.clone())
            .await;

        match result {
            Ok(()) => trace!(bucket = %self.progressive_bucket, key = %key, "Stored response"),
            Err(e) => warn!(
                bucket = %self.progressive_bucket,
                key = %key,
                error = %e,
                "Failed to store response"
            ),
        }
    }

    async fn offline_page(&self) -> Option<Response> {
        let key = self.offline_fallback.as_ref()?;
        self.caches.match_request(key).await.ok().flatten()
    }
}
