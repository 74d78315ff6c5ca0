//! Error types for catalog search.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while loading, ranking or presenting the catalog.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Storage address is malformed (no scheme, empty bucket or key).
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// Storage address uses a scheme other than `s3`.
    #[error("Unsupported location scheme '{scheme}': only s3:// locations are supported")]
    UnsupportedLocation {
        /// The offending scheme.
        scheme: String,
    },

    /// Credentials are missing, invalid or expired.
    #[error("Access error: {0}")]
    Access(String),

    /// The object could not be fetched (network failure, missing object).
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The embedding table payload is malformed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The text encoder could not be initialized.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// The text encoder failed on a single request.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A vector does not match the table dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the embedding table.
        expected: usize,
        /// Dimension that was supplied.
        actual: usize,
    },

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SearchError {
    /// Short machine-readable name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::InvalidLocation(_) => "invalid_location",
            SearchError::UnsupportedLocation { .. } => "unsupported_location",
            SearchError::Access(_) => "access_error",
            SearchError::Fetch(_) => "fetch_error",
            SearchError::Parse(_) => "parse_error",
            SearchError::ModelLoad(_) => "model_load_error",
            SearchError::Encode(_) => "encode_error",
            SearchError::DimensionMismatch { .. } => "dimension_mismatch",
            SearchError::InvalidRequest(_) => "invalid_request",
            SearchError::Config(_) => "config_error",
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        SearchError::Fetch(e.to_string())
    }
}

impl From<csv::Error> for SearchError {
    fn from(e: csv::Error) -> Self {
        match e.position() {
            Some(pos) => SearchError::Parse(format!("line {}: {}", pos.line(), e)),
            None => SearchError::Parse(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::Fetch("connection refused".to_string());
        assert_eq!(err.to_string(), "Fetch error: connection refused");

        let err = SearchError::UnsupportedLocation {
            scheme: "http".to_string(),
        };
        assert!(err.to_string().contains("'http'"));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = SearchError::DimensionMismatch {
            expected: 512,
            actual: 384,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 512, got 384");
        assert_eq!(err.kind(), "dimension_mismatch");
    }
}
