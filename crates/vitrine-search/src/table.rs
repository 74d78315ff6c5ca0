//! Embedding table loading and the process-wide table cache.
//!
//! A table is a CSV payload stored in S3: one row per catalog item, an id
//! column holding the item's image location, then one column per embedding
//! component. Tables are parsed once and kept for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{Result, SearchError};
use crate::fetch::SharedFetcher;
use crate::location::StorageLocation;
use crate::presign::{DEFAULT_EXPIRATION, SharedResolver};
use crate::search::Matrix;

/// How the CSV payload is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TableLayout {
    /// The first record is a header row.
    pub has_header: bool,
    /// The first column is a row label to ignore; ids live in the second column.
    pub index_column: bool,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            has_header: true,
            index_column: false,
        }
    }
}

impl TableLayout {
    fn id_column(&self) -> usize {
        usize::from(self.index_column)
    }
}

/// Item ids and their embedding vectors, positionally aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    ids: Vec<String>,
    matrix: Matrix,
}

impl EmbeddingTable {
    /// Build a table from ids and equally sized vectors.
    pub fn new(ids: Vec<String>, rows: Vec<Vec<f32>>) -> Result<Self> {
        if ids.len() != rows.len() {
            return Err(SearchError::Parse(format!(
                "{} ids for {} vectors",
                ids.len(),
                rows.len()
            )));
        }
        Ok(Self {
            ids,
            matrix: Matrix::from_rows(rows)?,
        })
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table has no items.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.matrix.dim()
    }

    /// Item ids in row order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Id of row `index`.
    pub fn id(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    /// The embedding matrix.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }
}

/// Parse a CSV payload into an [`EmbeddingTable`].
pub fn parse_table(payload: &[u8], layout: TableLayout) -> Result<EmbeddingTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(layout.has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(payload);

    let id_column = layout.id_column();
    let mut ids = Vec::new();
    let mut rows: Vec<Vec<f32>> = Vec::new();
    let mut dim: Option<usize> = None;

    for record in reader.byte_records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let id = record.get(id_column).ok_or_else(|| {
            SearchError::Parse(format!("line {line}: missing id column {id_column}"))
        })?;
        let id = decode_field(id, line, id_column)?;

        let vector = record
            .iter()
            .enumerate()
            .skip(id_column + 1)
            .map(|(column, field)| {
                decode_field(field, line, column)
                    .and_then(|field| parse_component(field, line, column))
            })
            .collect::<Result<Vec<f32>>>()?;

        if vector.is_empty() {
            return Err(SearchError::Parse(format!(
                "line {line}: row has no vector columns"
            )));
        }

        match dim {
            None => dim = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(SearchError::Parse(format!(
                    "line {line}: expected {expected} vector columns, found {}",
                    vector.len()
                )));
            }
            Some(_) => {}
        }

        ids.push(id.to_string());
        rows.push(vector);
    }

    if ids.is_empty() {
        return Err(SearchError::Parse("table has no rows".to_string()));
    }

    EmbeddingTable::new(ids, rows)
}

fn decode_field(field: &[u8], line: u64, column: usize) -> Result<&str> {
    std::str::from_utf8(field).map_err(|e| {
        SearchError::Parse(format!("line {line}, column {column}: invalid UTF-8: {e}"))
    })
}

fn parse_component(field: &str, line: u64, column: usize) -> Result<f32> {
    let value: f32 = field.parse().map_err(|_| {
        SearchError::Parse(format!(
            "line {line}, column {column}: '{field}' is not a number"
        ))
    })?;
    if !value.is_finite() {
        return Err(SearchError::Parse(format!(
            "line {line}, column {column}: '{field}' is not finite"
        )));
    }
    Ok(value)
}

/// Resolves, fetches and parses embedding tables.
#[derive(Clone)]
pub struct TableLoader {
    resolver: SharedResolver,
    fetcher: SharedFetcher,
    layout: TableLayout,
    expiration: Duration,
}

impl TableLoader {
    /// Create a loader with the default layout and URL lifetime.
    pub fn new(resolver: SharedResolver, fetcher: SharedFetcher) -> Self {
        Self {
            resolver,
            fetcher,
            layout: TableLayout::default(),
            expiration: DEFAULT_EXPIRATION,
        }
    }

    /// Set the CSV layout.
    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the lifetime of the presigned URL used for the fetch.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Load the table stored at `location` (an `s3://` address).
    pub async fn load(&self, location: &str) -> Result<EmbeddingTable> {
        StorageLocation::parse(location)?;

        let start = Instant::now();
        let url = self.resolver.resolve(location, self.expiration)?;
        let payload = self.fetcher.fetch(&url).await?;
        let table = parse_table(&payload, self.layout)?;

        tracing::info!(
            location,
            rows = table.len(),
            dim = table.dim(),
            bytes = payload.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Loaded embedding table"
        );
        Ok(table)
    }
}

/// Process-wide cache of loaded tables, keyed by location string.
///
/// Concurrent first loads of the same location share one fetch. A failed
/// load leaves nothing behind, so the next call tries again.
pub struct TableCache {
    loader: TableLoader,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<EmbeddingTable>>>>>,
}

impl TableCache {
    /// Create an empty cache backed by `loader`.
    pub fn new(loader: TableLoader) -> Self {
        Self {
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached table for `location`, loading it on first use.
    pub async fn load(&self, location: &str) -> Result<Arc<EmbeddingTable>> {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.entry(location.to_string()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            tracing::debug!(location, "Embedding table cache miss");
            self.loader.load(location).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Whether `location` has a loaded table.
    pub fn contains(&self, location: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .get(location)
            .is_some_and(|cell| cell.initialized())
    }

    /// Fetch `location` again and swap it in once `accept` takes it.
    ///
    /// The previously cached table stays in place when the load or `accept`
    /// fails.
    pub async fn reload<T>(
        &self,
        location: &str,
        accept: impl FnOnce(Arc<EmbeddingTable>) -> Result<T>,
    ) -> Result<T> {
        let table = Arc::new(self.loader.load(location).await?);
        let accepted = accept(table.clone())?;

        let cell = Arc::new(OnceCell::new_with(Some(table)));
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(location.to_string(), cell);
        Ok(accepted)
    }

    /// Drop the cached table for `location`.
    pub fn invalidate(&self, location: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.remove(location).is_some()
    }

    /// Drop every cached table.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}
