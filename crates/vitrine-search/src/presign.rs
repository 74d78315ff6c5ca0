//! Presigned GET URLs for S3 objects.
//!
//! URLs are signed locally with AWS Signature Version 4 (query-string
//! authentication), so resolving a location never touches the network. The
//! signature embeds an expiry; callers must not keep a URL past it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Result, SearchError};
use crate::location::StorageLocation;

/// Default lifetime of a presigned URL.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(3600);

/// Longest lifetime S3 accepts for a SigV4 presigned URL (seven days).
pub const MAX_EXPIRATION_SECS: u64 = 604_800;

/// Default signing region.
pub const DEFAULT_REGION: &str = "eu-west-1";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Turns a storage location into a time-limited fetch URL.
pub trait UrlResolver: Send + Sync {
    /// Resolve `location` (an `s3://` address) to a URL valid for `expires`.
    fn resolve(&self, location: &str, expires: Duration) -> Result<String>;
}

/// A resolver that can be shared across handlers.
pub type SharedResolver = Arc<dyn UrlResolver>;

/// Access key pair used for signing.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
}

impl Credentials {
    /// Create a static key pair.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach a session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    fn ensure_present(&self) -> Result<()> {
        if self.access_key_id.trim().is_empty() {
            return Err(SearchError::Access("missing access key id".to_string()));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(SearchError::Access("missing secret access key".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Configuration for the S3 presigner.
#[derive(Debug, Clone)]
pub struct PresignConfig {
    /// Signing region.
    pub region: String,
    /// Endpoint override (`scheme://host[:port]`) for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Put the bucket in the path instead of the host name.
    pub path_style: bool,
    /// Access credentials.
    pub credentials: Credentials,
}

impl Default for PresignConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            path_style: false,
            credentials: Credentials::default(),
        }
    }
}

impl PresignConfig {
    /// Create a config for the given credentials and default region.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }

    /// Set the signing region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Enable or disable path-style addressing.
    pub fn with_path_style(mut self, enabled: bool) -> Self {
        self.path_style = enabled;
        self
    }
}

/// Signs S3 GET URLs with SigV4.
#[derive(Debug, Clone)]
pub struct S3Presigner {
    config: PresignConfig,
    scheme: String,
    endpoint_host: String,
}

impl S3Presigner {
    /// Create a presigner, validating the endpoint override if one is set.
    pub fn new(config: PresignConfig) -> Result<Self> {
        let (scheme, endpoint_host) = match &config.endpoint {
            Some(endpoint) => {
                let url = reqwest::Url::parse(endpoint).map_err(|e| {
                    SearchError::Config(format!("invalid storage endpoint '{endpoint}': {e}"))
                })?;
                let host = url.host_str().ok_or_else(|| {
                    SearchError::Config(format!("storage endpoint '{endpoint}' has no host"))
                })?;
                let host = match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                (url.scheme().to_string(), host)
            }
            None => (
                "https".to_string(),
                format!("s3.{}.amazonaws.com", config.region),
            ),
        };

        Ok(Self {
            config,
            scheme,
            endpoint_host,
        })
    }

    /// The presigner configuration.
    pub fn config(&self) -> &PresignConfig {
        &self.config
    }

    /// Presign a GET for `location`, signed as of `now`.
    pub fn presign_at(
        &self,
        location: &StorageLocation,
        expires: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.config.credentials.ensure_present()?;

        let expires_secs = expires.as_secs();
        if expires_secs == 0 || expires_secs > MAX_EXPIRATION_SECS {
            return Err(SearchError::InvalidRequest(format!(
                "expiration must be between 1 and {MAX_EXPIRATION_SECS} seconds, got {expires_secs}"
            )));
        }

        let (host, canonical_uri) = if self.config.path_style {
            (
                self.endpoint_host.clone(),
                format!(
                    "/{}/{}",
                    urlencoding::encode(location.bucket()),
                    encode_key(location.key())
                ),
            )
        } else {
            (
                format!("{}.{}", location.bucket(), self.endpoint_host),
                format!("/{}", encode_key(location.key())),
            )
        };

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.config.region);
        let credential = format!("{}/{scope}", self.config.credentials.access_key_id);

        let mut query: Vec<(&str, String)> = vec![
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            ("X-Amz-Credential", credential),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", expires_secs.to_string()),
            ("X-Amz-SignedHeaders", "host".to_string()),
        ];
        if let Some(token) = &self.config.credentials.session_token {
            query.push(("X-Amz-Security-Token", token.clone()));
        }
        query.sort_by(|a, b| a.0.cmp(b.0));

        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n{canonical_uri}\n{canonical_query}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}"
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(&date);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        tracing::debug!(
            bucket = location.bucket(),
            key = location.key(),
            expires_secs,
            "Presigned object URL"
        );

        Ok(format!(
            "{}://{host}{canonical_uri}?{canonical_query}&X-Amz-Signature={signature}",
            self.scheme
        ))
    }

    fn signing_key(&self, date: &str) -> [u8; 32] {
        let secret = format!("AWS4{}", self.config.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.config.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

impl UrlResolver for S3Presigner {
    fn resolve(&self, location: &str, expires: Duration) -> Result<String> {
        let location = StorageLocation::parse(location)?;
        self.presign_at(&location, expires, Utc::now())
    }
}

/// URI-encode each path segment of an object key, keeping the slashes.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// HMAC-SHA256 (RFC 2104) over a 64-byte block.
fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK_SIZE: usize = 64;

    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        key_block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    inner.update(key_block.map(|b| b ^ 0x36));
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(key_block.map(|b| b ^ 0x5c));
    outer.update(inner_hash);

    let mut out = [0u8; 32];
    out.copy_from_slice(&outer.finalize());
    out
}
