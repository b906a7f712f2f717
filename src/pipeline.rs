//! Pipeline facade.
//!
//! Wires the processor, index, aggregator, orchestrator, and gateway
//! together from one validated configuration, and exposes the handful of
//! operations callers actually need: ingest, retrieve, answer, forget.

use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;

use crate::core::config::RagConfig;
use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;
use crate::generation::{GeneratedText, GenerationGateway, GenerationProvider};
use crate::index::sqlite::SqliteVectorStore;
use crate::index::VectorIndex;
use crate::processor::{DocumentFormat, DocumentProcessor};
use crate::retrieval::{RetrievalContext, RetrievalOrchestrator};
use crate::search::SearchAggregator;

/// Outcome of one document ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub records: usize,
}

pub struct Pipeline {
    processor: DocumentProcessor,
    index: Arc<VectorIndex>,
    orchestrator: RetrievalOrchestrator,
    gateway: Option<GenerationGateway>,
}

impl Pipeline {
    /// Validate the configuration and assemble all components over a SQLite
    /// database at `db_path`.
    ///
    /// `generator` is optional: a pipeline without one supports ingestion
    /// and retrieval but rejects `answer`.
    pub async fn open(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Option<Arc<dyn GenerationProvider>>,
        db_path: &Path,
    ) -> Result<Self, RagError> {
        config.validate()?;

        let store = Arc::new(SqliteVectorStore::open(db_path).await?);
        let index = Arc::new(
            VectorIndex::open(store, embedder, config.index.embedding_dimension).await?,
        );

        let aggregator = if config.search.enabled {
            let client = Client::new();
            Some(Arc::new(SearchAggregator::new(&config.search, &client)))
        } else {
            None
        };

        let orchestrator = RetrievalOrchestrator::new(config, index.clone(), aggregator);
        let gateway = generator.map(|provider| GenerationGateway::new(provider, &config.generation));

        tracing::info!(
            "pipeline ready: db={}, search={}, generation={}",
            db_path.display(),
            if config.search.enabled { "on" } else { "off" },
            if gateway.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            processor: DocumentProcessor::new(&config.chunking),
            index,
            orchestrator,
            gateway,
        })
    }

    /// Parse, chunk, embed, and persist one document.
    ///
    /// Re-ingesting unchanged content is idempotent: chunk ids derive from
    /// content, so existing records are replaced rather than duplicated.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
        source: &str,
    ) -> Result<IngestReport, RagError> {
        let document = self.processor.process(bytes, format, source)?;
        let chunks = self.processor.chunk(&document);
        let records = self.index.add(&chunks, &document.source).await?;

        tracing::info!(
            "ingested '{}': {} chunks, {} records",
            source,
            chunks.len(),
            records.len()
        );

        Ok(IngestReport {
            document_id: document.id,
            chunks: chunks.len(),
            records: records.len(),
        })
    }

    /// Assemble a ranked context for a query.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalContext, RagError> {
        self.orchestrator.retrieve(query).await
    }

    /// Retrieve a context and generate an answer from it.
    pub async fn answer(&self, template: &str, query: &str) -> Result<GeneratedText, RagError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| RagError::Config("no generation provider configured".into()))?;

        let context = self.orchestrator.retrieve(query).await?;
        gateway.generate(template, &context, query).await
    }

    /// Remove a document and all its chunk records.
    pub async fn forget(&self, document_id: &str) -> Result<usize, RagError> {
        let removed = self.index.remove(document_id).await?;
        tracing::info!("forgot document '{}': {} records removed", document_id, removed);
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<PipelineStats, RagError> {
        Ok(PipelineStats {
            records: self.index.count().await?,
        })
    }
}
