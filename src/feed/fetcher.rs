use crate::cache::CacheStore;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Default freshness threshold for cached payloads (one hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed over the network.
///
/// All of them are fatal for the aggregation that issued the fetch; a stale
/// cached copy is never substituted.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// One URL to resolve and how old a cached copy may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub max_age: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, max_age: Duration) -> Self {
        Self {
            url: url.into(),
            max_age,
        }
    }

    fn accepts_age(&self, age: Duration) -> bool {
        !self.max_age.is_zero() && age <= self.max_age
    }
}

/// Resolves feed URLs to raw bytes, preferring the on-disk cache.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    cache: CacheStore,
    request_timeout: Duration,
    max_feed_bytes: usize,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, cache: CacheStore) -> Self {
        Self {
            client,
            cache,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_feed_bytes(mut self, limit: usize) -> Self {
        self.max_feed_bytes = limit;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Returns the feed bytes for `request.url`.
    ///
    /// A cached copy no older than `request.max_age` is returned without
    /// touching the network. Otherwise exactly one GET is issued; on success
    /// the body replaces the cached copy, on failure the error is returned
    /// even if a stale copy exists.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the configured timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
    ///
    /// Cache failures are logged and never returned.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let url = request.url.as_str();

        match self.cache.get(url) {
            Ok(Some(cached)) if request.accepts_age(cached.age) => {
                tracing::debug!(
                    url = %url,
                    age_secs = cached.age.as_secs(),
                    bytes = cached.bytes.len(),
                    "Serving feed from cache"
                );
                return Ok(cached.bytes);
            }
            Ok(Some(cached)) => {
                tracing::debug!(
                    url = %url,
                    age_secs = cached.age.as_secs(),
                    max_age_secs = request.max_age.as_secs(),
                    "Cached feed is stale"
                );
            }
            Ok(None) => {
                tracing::debug!(url = %url, "Feed not cached");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cache read failed, fetching live");
            }
        }

        let bytes = self.fetch_live(url).await?;

        if let Err(e) = self.cache.put(url, &bytes) {
            tracing::warn!(url = %url, error = %e, "Failed to cache feed payload");
        }

        Ok(bytes)
    }

    async fn fetch_live(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tracing::info!(url = %url, "Fetching feed");

        let response = tokio::time::timeout(self.request_timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout(self.request_timeout))?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            tracing::warn!(url = %url, status = %response.status(), "Feed request failed");
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        tokio::time::timeout(
            self.request_timeout,
            read_limited_bytes(response, self.max_feed_bytes),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.request_timeout))?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
