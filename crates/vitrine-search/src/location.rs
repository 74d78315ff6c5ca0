//! `s3://bucket/key` storage addresses.

use std::fmt;

use crate::error::{Result, SearchError};

/// The only scheme accepted for storage locations.
pub const S3_SCHEME: &str = "s3";

/// A parsed object-storage address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    bucket: String,
    key: String,
}

impl StorageLocation {
    /// Create a location from its parts.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse an address of the form `s3://<bucket>/<key-path>`.
    ///
    /// The bucket is the host component and the key is the path with its
    /// leading slashes stripped. A scheme other than `s3` yields
    /// [`SearchError::UnsupportedLocation`]. An address with a port,
    /// userinfo, query or fragment, or without a non-empty bucket and key,
    /// yields [`SearchError::InvalidLocation`].
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, _) = uri
            .split_once("://")
            .ok_or_else(|| SearchError::InvalidLocation(format!("missing scheme in '{uri}'")))?;

        // Url lowercases the scheme; the match here is exact.
        if scheme != S3_SCHEME {
            return Err(SearchError::UnsupportedLocation {
                scheme: scheme.to_string(),
            });
        }

        let url = reqwest::Url::parse(uri)
            .map_err(|e| SearchError::InvalidLocation(format!("'{uri}': {e}")))?;

        if url.port().is_some() {
            return Err(SearchError::InvalidLocation(format!(
                "unexpected port in '{uri}'"
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(SearchError::InvalidLocation(format!(
                "unexpected userinfo in '{uri}'"
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(SearchError::InvalidLocation(format!(
                "unexpected query or fragment in '{uri}'"
            )));
        }

        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| SearchError::InvalidLocation(format!("missing bucket in '{uri}'")))?;

        // The key is taken verbatim; Url would percent-encode it.
        let path = uri[S3_SCHEME.len() + 3..]
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or("");
        let key = path.trim_start_matches('/');
        if key.is_empty() {
            return Err(SearchError::InvalidLocation(format!(
                "missing object key in '{uri}'"
            )));
        }

        Ok(Self::new(bucket, key))
    }

    /// Bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key, without a leading slash.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", S3_SCHEME, self.bucket, self.key)
    }
}

impl std::str::FromStr for StorageLocation {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
