//! Brute-force cosine top-K over an in-memory embedding matrix.
//!
//! Scores every row against the query (O(N*D)), sorts descending with ties
//! broken by row index, and keeps the first `k`. There is no index structure:
//! catalogs are small and loaded once, so a linear scan is all that is needed.
//!
//! Zero-norm vectors have no defined cosine. Any pair involving one scores
//! `0.0`, which keeps the ordering total and NaN-free.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::{Result, SearchError};

/// Row-major `N x D` matrix of `f32` embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    dim: usize,
}

impl Matrix {
    /// Build a matrix from rows that must all have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(SearchError::Parse(format!(
                    "row {i}: expected {dim} components, found {}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Ok(Self { data, dim })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row `index`, if it exists.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.dim;
        Some(&self.data[start..start + self.dim])
    }

    /// Iterate over rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on a zero chunk size.
        self.data.chunks_exact(self.dim.max(1))
    }
}

/// One ranked match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hit {
    /// Row index in the matrix.
    pub index: usize,
    /// Cosine similarity with the query, in `[-1, 1]`.
    pub score: f32,
}

/// Hits ordered by score descending, then index ascending.
pub type RankedResult = Vec<Hit>;

/// Euclidean norm.
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two vectors; `0.0` if either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    cosine_with_norms(a, norm_a, b, norm_b)
}

fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    // Rounding can push |cos| a hair past 1.
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Rank every row of `matrix` against `query` and return the best `k`.
///
/// `k` larger than the row count is clamped; `k == 0` returns nothing. The
/// query must have the matrix dimension; extra or missing trailing
/// components are ignored by the dot product.
pub fn search(query: &[f32], matrix: &Matrix, k: usize) -> RankedResult {
    debug_assert!(
        matrix.is_empty() || query.len() == matrix.dim(),
        "query dimension {} does not match matrix dimension {}",
        query.len(),
        matrix.dim()
    );

    let k = k.min(matrix.len());
    if k == 0 {
        return Vec::new();
    }

    let query_norm = norm(query);
    let mut hits: Vec<Hit> = matrix
        .rows()
        .enumerate()
        .map(|(index, row)| {
            let row_norm = norm(row);
            let score = if query_norm == 0.0 || row_norm == 0.0 {
                0.0
            } else {
                cosine_with_norms(query, query_norm, row, row_norm)
            };
            Hit { index, score }
        })
        .collect();

    hits.sort_by(rank_order);
    hits.truncate(k);
    hits
}

/// Score descending, then index ascending.
fn rank_order(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}
