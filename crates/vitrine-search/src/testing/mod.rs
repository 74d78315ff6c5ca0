//! Testing utilities for vitrine-search.
//!
//! This module provides in-memory and HTTP stand-ins for the object store and
//! the embedding model so search, loading and rendering can be tested without
//! cloud credentials.
//!
//! # Components
//!
//! - [`fixtures`]: Sample tables, CSV payloads and image bytes
//! - [`memory`]: In-process store, identity resolver and mock encoder
//! - [`mock_server`]: HTTP server speaking path-style S3 GET and `/v1/embeddings`

pub mod fixtures;
pub mod memory;
pub mod mock_server;

pub use memory::{MemoryStore, MockEncoder, StaticResolver};
pub use mock_server::MockServer;
