//! In-process stand-ins for storage, URL signing and the text encoder.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::encoder::TextEncoder;
use crate::error::{Result, SearchError};
use crate::fetch::ObjectFetcher;
use crate::location::StorageLocation;
use crate::presign::UrlResolver;

/// Resolver that validates the location and hands it back unchanged.
///
/// Pairs with [`MemoryStore`], which is keyed by location.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolver;

impl UrlResolver for StaticResolver {
    fn resolve(&self, location: &str, _expires: Duration) -> Result<String> {
        StorageLocation::parse(location)?;
        Ok(location.to_string())
    }
}

/// Object store held in memory, counting every fetch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Bytes>>,
    fetches: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object (builder style).
    pub fn with_object(self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.put(url, body);
        self
    }

    /// Add or replace an object.
    pub fn put(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(url.into(), body.into());
    }

    /// Number of fetches made so far, including misses.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectFetcher for MemoryStore {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SearchError::Fetch(format!("object not found: {url}")))
    }
}

/// Encoder returning canned vectors, zeros for unknown text.
#[derive(Debug)]
pub struct MockEncoder {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    requests: Mutex<Vec<String>>,
}

impl MockEncoder {
    /// Create an encoder of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Map `text` to `vector`.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    /// Texts encoded so far, in order.
    pub fn captured_requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextEncoder for MockEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.requests.lock().unwrap().push(text.to_string());
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.dimension]))
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
