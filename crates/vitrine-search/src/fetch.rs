//! Fetching object bytes from presigned URLs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};

use crate::error::{Result, SearchError};

/// Default timeout for object fetches.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Downloads the body behind a fetch URL.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// GET `url` and return the full body.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// A fetcher that can be shared across handlers.
pub type SharedFetcher = Arc<dyn ObjectFetcher>;

/// Object fetcher over HTTP(S).
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a fetcher with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let bytes = response.bytes().await?;
        tracing::debug!(status = %status, bytes = bytes.len(), "Fetched object");
        Ok(bytes)
    }
}

/// Map a non-success storage response onto the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> SearchError {
    let detail = body.chars().take(200).collect::<String>();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SearchError::Access(format!("storage returned {status}: {detail}"))
        }
        StatusCode::NOT_FOUND => SearchError::Fetch(format!("object not found ({status})")),
        _ => SearchError::Fetch(format!("storage returned {status}: {detail}")),
    }
}
