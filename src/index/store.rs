//! VectorStore trait — abstract interface for vector persistence backends.
//!
//! The primary implementation is `SqliteVectorStore` in the `sqlite` module.
//! Stores only persist and rank records; embedding happens in `VectorIndex`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

/// A stored chunk embedding with enough metadata to assemble context
/// without going back to the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Content-hash derived id; identical chunk text maps to the same
    /// record, so re-adding overwrites instead of duplicating.
    pub chunk_id: String,
    /// Owning document, used for cascade deletion.
    pub document_id: String,
    /// Origin of the document (path or URL).
    pub source: String,
    /// The chunk text.
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub vector: Vec<f32>,
    /// Unix seconds at insertion, used for recency scoring.
    pub created_at: i64,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Abstract interface for vector persistence.
///
/// Implementations must survive process restart and reproduce identical
/// query results after a reload. Writers are serialized by the caller;
/// a store only needs to be safe for concurrent reads during one write.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite records, keyed by `chunk_id`.
    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<(), RagError>;

    /// Top-`k` records by descending cosine similarity; ties break toward
    /// the most recent insertion.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>, RagError>;

    /// Delete all records belonging to a document. Returns how many.
    async fn delete_document(&self, document_id: &str) -> Result<usize, RagError>;

    async fn count(&self) -> Result<usize, RagError>;

    /// Vector width recorded when the store was first written, if any.
    async fn stored_dimension(&self) -> Result<Option<usize>, RagError>;

    async fn set_dimension(&self, dimension: usize) -> Result<(), RagError>;

    /// Drop all records and dimension metadata. Used to rebuild after an
    /// embedding model change.
    async fn clear(&self) -> Result<(), RagError>;
}

/// Cosine similarity of two equal-length vectors; 0.0 when degenerate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(approx_eq(cosine_similarity(&v, &v), 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_or_degenerate_vectors() {
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0));
        assert!(approx_eq(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0));
        assert!(approx_eq(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0));
    }
}
