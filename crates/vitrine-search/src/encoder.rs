//! Text encoders that map a query into the catalog's embedding space.
//!
//! The production encoder talks to an OpenAI-compatible `/embeddings`
//! endpoint (Ollama, text-embeddings-inference, vLLM and hosted APIs all
//! speak it) serving the same multilingual text/image model that produced
//! the catalog table. The encoder is loaded once at startup and shared.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Default embeddings API base URL (a local Ollama).
pub const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "sentence-transformers/clip-ViT-B-32-multilingual-v1";

/// Default timeout for embedding requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Text sent once at load time to check the model answers and learn its dimension.
const PROBE_TEXT: &str = "product";

/// Maps query text to a fixed-length vector.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// Encode `text`. The empty string is valid input.
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimension, if known.
    fn dimension(&self) -> Option<usize>;

    /// Model name, for logging.
    fn name(&self) -> &str;
}

/// An encoder that can be shared across handlers.
pub type SharedEncoder = Arc<dyn TextEncoder>;

/// Configuration for the HTTP encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Base URL for the API; `/embeddings` is appended.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl EncoderConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Encoder backed by an OpenAI-compatible embeddings endpoint.
pub struct HttpEncoder {
    client: Client,
    config: EncoderConfig,
    dimension: usize,
}

impl std::fmt::Debug for HttpEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEncoder")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl HttpEncoder {
    /// Initialize the encoder: build the client and probe the model once.
    ///
    /// Any failure is a [`SearchError::ModelLoad`]; without a working model
    /// no query can be answered.
    pub async fn load(config: EncoderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchError::ModelLoad(format!("Failed to create HTTP client: {}", e)))?;

        let start = Instant::now();
        let probe = request_embedding(&client, &config, PROBE_TEXT)
            .await
            .map_err(|e| {
                SearchError::ModelLoad(format!(
                    "model '{}' at {} is not usable: {}",
                    config.model, config.base_url, e
                ))
            })?;

        if probe.is_empty() {
            return Err(SearchError::ModelLoad(format!(
                "model '{}' returned an empty embedding",
                config.model
            )));
        }

        tracing::info!(
            model = %config.model,
            base_url = %config.base_url,
            dimension = probe.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Loaded text encoder"
        );

        Ok(Self {
            client,
            dimension: probe.len(),
            config,
        })
    }

    /// The encoder configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

#[async_trait]
impl TextEncoder for HttpEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let embedding = request_embedding(&self.client, &self.config, text).await?;

        if embedding.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        tracing::debug!(
            model = %self.config.model,
            chars = text.chars().count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Encoded query"
        );
        Ok(embedding)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

async fn request_embedding(client: &Client, config: &EncoderConfig, text: &str) -> Result<Vec<f32>> {
    let url = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
    let mut builder = client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .json(&EmbeddingRequest {
            model: &config.model,
            input: [text],
        });
    if let Some(key) = &config.api_key {
        builder = builder.bearer_auth(key);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| SearchError::Encode(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SearchError::Encode(format!(
            "embeddings endpoint returned {status}: {}",
            body.chars().take(200).collect::<String>()
        )));
    }

    let parsed: EmbeddingResponse = response
        .json()
        .await
        .map_err(|e| SearchError::Encode(format!("invalid embeddings response: {e}")))?;

    parsed
        .data
        .into_iter()
        .min_by_key(|d| d.index)
        .map(|d| d.embedding)
        .ok_or_else(|| SearchError::Encode("embeddings response had no data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockServer;

    #[test]
    fn test_config_builder() {
        let config = EncoderConfig::new()
            .with_model("clip")
            .with_base_url("http://embed:8080/v1")
            .with_api_key("sk-test")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.model, "clip");
        assert_eq!(config.base_url, "http://embed:8080/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(EmbeddingRequest {
            model: "clip",
            input: ["blue bottle"],
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"model": "clip", "input": ["blue bottle"]}));
    }

    #[tokio::test]
    async fn test_load_unreachable_is_model_load_error() {
        let config = EncoderConfig::new()
            .with_base_url("http://127.0.0.1:1/v1")
            .with_timeout(Duration::from_secs(2));
        let err = HttpEncoder::load(config).await.unwrap_err();
        assert!(matches!(err, SearchError::ModelLoad(_)));
    }

    #[tokio::test]
    async fn test_encode_via_mock_server() {
        let server = MockServer::start().await;
        server.set_embedding("blue bottle", vec![0.0, 1.0, 0.0]);
        server.set_default_embedding(vec![1.0, 0.0, 0.0]);

        let encoder = HttpEncoder::load(EncoderConfig::new().with_base_url(server.embeddings_url()))
            .await
            .unwrap();
        assert_eq!(encoder.dimension(), Some(3));

        assert_eq!(encoder.encode("blue bottle").await.unwrap(), vec![0.0, 1.0, 0.0]);
        // Empty input is valid and gets the default vector.
        assert_eq!(encoder.encode("").await.unwrap(), vec![1.0, 0.0, 0.0]);
        // Deterministic for the same input.
        assert_eq!(
            encoder.encode("blue bottle").await.unwrap(),
            encoder.encode("blue bottle").await.unwrap()
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_encode_dimension_drift_is_rejected() {
        let server = MockServer::start().await;
        server.set_default_embedding(vec![1.0, 0.0]);
        server.set_embedding("odd", vec![1.0, 0.0, 0.0]);

        let encoder = HttpEncoder::load(EncoderConfig::new().with_base_url(server.embeddings_url()))
            .await
            .unwrap();
        let err = encoder.encode("odd").await.unwrap_err();
        assert!(matches!(err, SearchError::DimensionMismatch { expected: 2, actual: 3 }));

        server.shutdown().await;
    }
}
