//! Vector index: embeds chunks and answers nearest-neighbor queries.
//!
//! Owns record storage for its full lifetime. Writes go through a single
//! writer lock; reads run concurrently against the store.

pub mod sqlite;
pub mod store;

use std::sync::Arc;

use chrono::Utc;

use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;
use crate::processor::{content_id, Chunk};
use store::{ScoredRecord, VectorRecord, VectorStore};

/// Embedding failures escalate to a configuration error once this many
/// happen back to back.
const MAX_CONSECUTIVE_EMBED_FAILURES: usize = 3;

pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Open the index over a store, verifying that persisted vectors match
    /// the configured dimension. A mismatch is fatal until the index is
    /// rebuilt with [`VectorIndex::rebuild`].
    pub async fn open(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        dimension: usize,
    ) -> Result<Self, RagError> {
        if embedder.dimension() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: embedder.dimension(),
            });
        }

        match store.stored_dimension().await? {
            Some(stored) if stored != dimension => {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: stored,
                });
            }
            Some(_) => {}
            None => store.set_dimension(dimension).await?,
        }

        Ok(Self {
            store,
            embedder,
            dimension,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Embed and store chunks, returning the resulting records.
    ///
    /// Record ids derive from the chunk text's content hash, so re-adding an
    /// unchanged document overwrites existing records instead of growing the
    /// store. A failed embedding skips that chunk; repeated back-to-back
    /// failures escalate to a fatal configuration error.
    pub async fn add(&self, chunks: &[Chunk], source: &str) -> Result<Vec<VectorRecord>, RagError> {
        let _writer = self.write_lock.lock().await;

        let mut records = Vec::with_capacity(chunks.len());
        let mut consecutive_failures = 0usize;
        let now = Utc::now().timestamp();

        for chunk in chunks {
            match self.embedder.embed(&chunk.text).await {
                Ok(vector) => {
                    if vector.len() != self.dimension {
                        return Err(RagError::DimensionMismatch {
                            expected: self.dimension,
                            actual: vector.len(),
                        });
                    }
                    consecutive_failures = 0;
                    records.push(VectorRecord {
                        chunk_id: content_id(&chunk.text),
                        document_id: chunk.document_id.clone(),
                        source: source.to_string(),
                        content: chunk.text.clone(),
                        start_offset: chunk.start,
                        end_offset: chunk.end,
                        vector,
                        created_at: now,
                    });
                }
                Err(err) if err.is_recoverable() => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        "skipping chunk {} of {}: embedding failed: {}",
                        chunk.index,
                        chunk.document_id,
                        err
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_EMBED_FAILURES {
                        return Err(RagError::Config(format!(
                            "embedding provider '{}' failing repeatedly: {}",
                            self.embedder.name(),
                            err
                        )));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.store.upsert_batch(records.clone()).await?;
        Ok(records)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let vector = self.embedder.embed(text).await?;
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Top-`k` records for an already-embedded query.
    pub async fn query_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, RagError> {
        self.store.search(vector, k).await
    }

    /// Top-`k` records by similarity to `text`, descending, ties toward the
    /// most recent insertion.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>, RagError> {
        let vector = self.embed_query(text).await?;
        self.query_vector(&vector, k).await
    }

    /// Cascade-delete every record of a document.
    pub async fn remove(&self, document_id: &str) -> Result<usize, RagError> {
        let _writer = self.write_lock.lock().await;
        let deleted = self.store.delete_document(document_id).await?;
        tracing::info!("removed {} records for document {}", deleted, document_id);
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<usize, RagError> {
        self.store.count().await
    }

    /// Drop everything and re-record the configured dimension. The only way
    /// out of a persisted [`RagError::DimensionMismatch`].
    pub async fn rebuild(&self) -> Result<(), RagError> {
        let _writer = self.write_lock.lock().await;
        self.store.clear().await?;
        self.store.set_dimension(self.dimension).await?;
        tracing::info!("index rebuilt at dimension {}", self.dimension);
        Ok(())
    }
}
