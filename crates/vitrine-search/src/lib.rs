//! vitrine-search: text-to-image product search
//!
//! This crate provides the search core behind Vitrine:
//! - `s3://` location parsing and SigV4 presigned URLs
//! - Embedding table loading from CSV with a per-process cache
//! - Text encoding through an OpenAI-compatible embeddings endpoint
//! - Cosine similarity top-K ranking
//! - Gallery rendering (image fetch, format sniffing, captions)
//! - An axum server for the search page and JSON API

pub mod catalog;
pub mod encoder;
pub mod error;
pub mod fetch;
pub mod gallery;
pub mod location;
pub mod page;
pub mod presign;
pub mod search;
pub mod server;
pub mod table;

// Testing utilities - available in test builds and behind the `testing` feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{Catalog, Match};
pub use encoder::{
    DEFAULT_API_BASE, DEFAULT_MODEL, EncoderConfig, HttpEncoder, SharedEncoder, TextEncoder,
};
pub use error::{Result, SearchError};
pub use fetch::{HttpFetcher, ObjectFetcher, SharedFetcher};
pub use gallery::{Gallery, GalleryImage, GalleryItem, caption_for};
pub use location::{S3_SCHEME, StorageLocation};
pub use page::{PageBody, UiSettings};
pub use presign::{
    Credentials, DEFAULT_EXPIRATION, DEFAULT_REGION, MAX_EXPIRATION_SECS, PresignConfig,
    S3Presigner, SharedResolver, UrlResolver,
};
pub use search::{Hit, Matrix, RankedResult, cosine_similarity, search};
pub use server::{SearchResponse, SearchResultItem, SearchServer, ServerConfig};
pub use table::{EmbeddingTable, TableCache, TableLayout, TableLoader, parse_table};
