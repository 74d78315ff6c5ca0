//! Configuration file support for Vitrine.
//!
//! All vitrine data is stored in a `.vitrine/` directory:
//! - `.vitrine/config.toml` - Configuration file
//! - `.vitrine/logs/` - Server log files
//!
//! Config discovery searches for `.vitrine/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The vitrine data directory name.
pub const VITRINE_DIR: &str = ".vitrine";
/// The config file name within the vitrine directory.
pub const CONFIG_FILE: &str = "config.toml";

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vitrine_search::{
    Credentials, DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_REGION, EncoderConfig,
    MAX_EXPIRATION_SECS, PresignConfig, StorageLocation, TableLayout, UiSettings,
};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Object storage access.
    pub storage: StorageConfig,
    /// Embedding table settings.
    pub catalog: CatalogConfig,
    /// Text encoder settings.
    pub model: ModelConfig,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Search page settings.
    pub ui: UiSettings,
}

/// Object storage configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Access key id (falls back to AWS_ACCESS_KEY_ID).
    pub access_key_id: Option<String>,
    /// Secret access key (falls back to AWS_SECRET_ACCESS_KEY).
    pub secret_access_key: Option<String>,
    /// Session token (falls back to AWS_SESSION_TOKEN).
    pub session_token: Option<String>,
    /// Signing region (falls back to AWS_DEFAULT_REGION).
    pub region: Option<String>,
    /// Endpoint override for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Address buckets in the path instead of the host name.
    pub path_style: bool,
}

impl StorageConfig {
    /// Credentials from the file, or the AWS environment variables.
    pub fn credentials(&self) -> Credentials {
        let mut credentials = Credentials::new(
            setting_or_env(&self.access_key_id, "AWS_ACCESS_KEY_ID").unwrap_or_default(),
            setting_or_env(&self.secret_access_key, "AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        );
        if let Some(token) = setting_or_env(&self.session_token, "AWS_SESSION_TOKEN") {
            credentials = credentials.with_session_token(token);
        }
        credentials
    }

    /// Signing region.
    pub fn region(&self) -> String {
        setting_or_env(&self.region, "AWS_DEFAULT_REGION")
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Build the presigner configuration.
    pub fn presign_config(&self) -> PresignConfig {
        let mut config = PresignConfig::new(self.credentials())
            .with_region(self.region())
            .with_path_style(self.path_style);
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint);
        }
        config
    }
}

/// Embedding table configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// `s3://` location of the embedding table.
    pub table: String,
    /// The first CSV record is a header row.
    pub has_header: bool,
    /// The first CSV column is a row label; ids are in the second column.
    pub index_column: bool,
    /// Lifetime of presigned URLs in seconds.
    pub url_expiration_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            has_header: true,
            index_column: false,
            url_expiration_secs: 3600,
        }
    }
}

impl CatalogConfig {
    /// CSV layout of the table.
    pub fn layout(&self) -> TableLayout {
        TableLayout {
            has_header: self.has_header,
            index_column: self.index_column,
        }
    }

    /// Lifetime of presigned URLs.
    pub fn url_expiration(&self) -> Duration {
        Duration::from_secs(self.url_expiration_secs)
    }
}

/// Text encoder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier.
    pub id: String,
    /// Embeddings API base URL.
    pub base_url: String,
    /// Bearer token (falls back to VITRINE_MODEL_API_KEY).
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    /// Build the encoder configuration.
    pub fn encoder_config(&self) -> EncoderConfig {
        let mut config = EncoderConfig::new()
            .with_model(&self.id)
            .with_base_url(&self.base_url)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(key) = setting_or_env(&self.api_key, "VITRINE_MODEL_API_KEY") {
            config = config.with_api_key(key);
        }
        config
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Whether to send permissive CORS headers.
    pub enable_cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl ServerSettings {
    /// Bind address, with optional command-line overrides.
    pub fn bind_addr(&self, host: Option<&str>, port: Option<u16>) -> Result<SocketAddr> {
        let host = host.unwrap_or(&self.host);
        let port = port.unwrap_or(self.port);
        format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid bind address {host}:{port}"))
    }
}

fn setting_or_env(value: &Option<String>, var: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    ///
    /// Searches for `.vitrine/config.toml` starting from the current directory
    /// and walking up to parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let vitrine_dir = dir.join(VITRINE_DIR);
            let config_path = vitrine_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                // Return the .vitrine directory, not the config file
                return Ok(Some((config, vitrine_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.catalog.table.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "catalog.table".to_string(),
                message: "Embedding table location is required (s3://bucket/key).".to_string(),
            });
        } else if let Err(e) = StorageLocation::parse(&self.catalog.table) {
            errors.push(ConfigValidationError {
                field: "catalog.table".to_string(),
                message: e.to_string(),
            });
        }

        let expiration = self.catalog.url_expiration_secs;
        if expiration == 0 || expiration > MAX_EXPIRATION_SECS {
            errors.push(ConfigValidationError {
                field: "catalog.url_expiration_secs".to_string(),
                message: format!(
                    "Expiration must be between 1 and {MAX_EXPIRATION_SECS} seconds, got {expiration}."
                ),
            });
        }

        if self.ui.max_k == 0 {
            errors.push(ConfigValidationError {
                field: "ui.max_k".to_string(),
                message: "Maximum result count must be at least 1.".to_string(),
            });
        }

        if self.ui.default_k == 0 || self.ui.default_k > self.ui.max_k {
            errors.push(ConfigValidationError {
                field: "ui.default_k".to_string(),
                message: format!(
                    "Default result count must be between 1 and {}, got {}.",
                    self.ui.max_k, self.ui.default_k
                ),
            });
        }

        if self.ui.columns == 0 {
            errors.push(ConfigValidationError {
                field: "ui.columns".to_string(),
                message: "Grid must have at least one column.".to_string(),
            });
        }

        if self.model.id.is_empty() {
            errors.push(ConfigValidationError {
                field: "model.id".to_string(),
                message: "Model id cannot be empty.".to_string(),
            });
        }

        let credentials = self.storage.credentials();
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            errors.push(ConfigValidationError {
                field: "storage.access_key_id".to_string(),
                message: "Storage credentials required. Set [storage] access_key_id and \
                          secret_access_key or the AWS_ACCESS_KEY_ID and \
                          AWS_SECRET_ACCESS_KEY env vars."
                    .to_string(),
            });
        }

        errors
    }
}

/// Contents written by `vitrine init`.
pub const DEFAULT_CONFIG: &str = r#"# Vitrine configuration

[catalog]
table = "s3://casa-bugatti/casabugatti-bottles-embeddings.csv"
has_header = true
index_column = true  # First column is a row index, ids are in "Name"
url_expiration_secs = 3600

[model]
id = "sentence-transformers/clip-ViT-B-32-multilingual-v1"
base_url = "http://localhost:11434/v1"  # Any OpenAI-compatible /embeddings API
timeout_secs = 60
# api_key = "..."  # Or set VITRINE_MODEL_API_KEY env var

[storage]
region = "eu-west-1"
# Credentials (or use AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY env vars)
# access_key_id = "..."
# secret_access_key = "..."
# endpoint = "http://localhost:9000"  # S3-compatible store
# path_style = true

[server]
host = "127.0.0.1"
port = 8080
enable_cors = true

[ui]
title = "Vitrine"
placeholder = "Example: Blue bottle"
default_k = 5
max_k = 10
columns = 3
image_width = 300
"#;
