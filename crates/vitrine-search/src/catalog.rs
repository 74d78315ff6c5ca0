//! Query handling over a loaded table and encoder.

use std::sync::Arc;

use serde::Serialize;

use crate::encoder::SharedEncoder;
use crate::error::{Result, SearchError};
use crate::search::{self, RankedResult};
use crate::table::EmbeddingTable;

/// A ranked catalog item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// Row index in the table.
    pub index: usize,
    /// Item id (the image location).
    pub id: String,
    /// Cosine similarity with the query.
    pub score: f32,
}

/// A loaded embedding table paired with the encoder that matches it.
///
/// Both halves are shared, read-only resources; a `Catalog` is cheap to clone
/// and is handed to request handlers explicitly.
#[derive(Clone)]
pub struct Catalog {
    table: Arc<EmbeddingTable>,
    encoder: SharedEncoder,
}

impl Catalog {
    /// Pair a table with an encoder, checking that their dimensions agree.
    pub fn new(table: Arc<EmbeddingTable>, encoder: SharedEncoder) -> Result<Self> {
        if let Some(dim) = encoder.dimension() {
            if dim != table.dim() {
                return Err(SearchError::DimensionMismatch {
                    expected: table.dim(),
                    actual: dim,
                });
            }
        }
        Ok(Self { table, encoder })
    }

    /// The embedding table.
    pub fn table(&self) -> &EmbeddingTable {
        &self.table
    }

    /// The text encoder.
    pub fn encoder(&self) -> &SharedEncoder {
        &self.encoder
    }

    /// Rank the table against an already encoded query vector.
    pub fn rank(&self, vector: &[f32], k: usize) -> Result<RankedResult> {
        if vector.len() != self.table.dim() {
            return Err(SearchError::DimensionMismatch {
                expected: self.table.dim(),
                actual: vector.len(),
            });
        }
        Ok(search::search(vector, self.table.matrix(), k))
    }

    /// Encode `text` and return the `k` closest items.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Match>> {
        let vector = self.encoder.encode(text).await?;
        let hits = self.rank(&vector, k)?;

        tracing::debug!(
            k,
            returned = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "Ranked catalog"
        );

        Ok(hits
            .into_iter()
            .map(|hit| Match {
                index: hit.index,
                id: self.table.ids()[hit.index].clone(),
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEncoder, fixtures};

    #[tokio::test]
    async fn test_query_returns_ranked_matches() {
        let encoder = MockEncoder::new(2).with_vector("red", vec![1.0, 0.0]);
        let catalog = Catalog::new(Arc::new(fixtures::three_item_table()), Arc::new(encoder)).unwrap();

        let matches = catalog.query("red", 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "s3://casa/bottles/red.png");
        assert_eq!(matches[1].id, "s3://casa/bottles/purple.png");
    }

    #[tokio::test]
    async fn test_empty_query_does_not_fail() {
        let encoder = MockEncoder::new(2);
        let catalog = Catalog::new(Arc::new(fixtures::three_item_table()), Arc::new(encoder)).unwrap();

        let matches = catalog.query("", 3).await.unwrap();
        assert_eq!(matches.len(), 3);
        assert!(matches.iter().all(|m| m.score == 0.0));
    }

    #[test]
    fn test_dimension_mismatch_on_construction() {
        let encoder = MockEncoder::new(4);
        let err = Catalog::new(Arc::new(fixtures::three_item_table()), Arc::new(encoder))
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::DimensionMismatch { expected: 2, actual: 4 }));
    }

    #[test]
    fn test_rank_rejects_wrong_dimension() {
        let catalog =
            Catalog::new(Arc::new(fixtures::three_item_table()), Arc::new(MockEncoder::new(2))).unwrap();
        assert!(catalog.rank(&[1.0, 0.0, 0.0], 1).is_err());
        assert_eq!(catalog.rank(&[0.0, 1.0], 1).unwrap()[0].index, 1);
    }
}
