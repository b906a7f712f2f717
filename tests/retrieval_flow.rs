//! End-to-end pipeline flow over the public API: ingest documents, retrieve
//! a ranked context, generate an answer, forget a document.

use std::sync::Arc;

use async_trait::async_trait;
use ragpipe::core::config::RagConfig;
use ragpipe::core::errors::RagError;
use ragpipe::embedding::EmbeddingProvider;
use ragpipe::generation::GenerationProvider;
use ragpipe::processor::DocumentFormat;
use ragpipe::pipeline::Pipeline;

/// Deterministic embedder: folds bytes into a fixed-dimension vector and
/// normalizes, so similar texts land near each other without a model.
struct FoldEmbedder {
    dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for FoldEmbedder {
    fn name(&self) -> &str {
        "fold"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut v = vec![0.0f32; self.dimension];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dimension] += f32::from(b) / 255.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Echoes the prompt so assertions can inspect what generation received.
struct EchoGenerator;

#[async_trait]
impl GenerationProvider for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String, RagError> {
        Ok(prompt.to_string())
    }
}

fn local_config() -> RagConfig {
    let mut config = RagConfig::default();
    config.index.embedding_dimension = 16;
    config.search.enabled = false;
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 40;
    config.chunking.min_chunk_size = 30;
    config.retrieval.similarity_threshold = 0.0;
    config.retrieval.token_budget = 1000;
    config
}

async fn open_pipeline(dir: &tempfile::TempDir) -> Pipeline {
    Pipeline::open(
        &local_config(),
        Arc::new(FoldEmbedder { dimension: 16 }),
        Some(Arc::new(EchoGenerator)),
        &dir.path().join("index.db"),
    )
    .await
    .unwrap()
}

const OWNERSHIP_DOC: &str = "\
# Ownership

Every value in the language has a single owner. When the owner goes out of \
scope the value is dropped and its resources are released deterministically.

# Borrowing

References borrow a value without taking ownership. At any time there may \
be any number of shared references or exactly one mutable reference.";

const RUNTIME_DOC: &str = "\
# Task scheduling

The async runtime multiplexes many lightweight tasks over a small pool of \
worker threads. A task yields at every await point, which keeps a single \
slow future from starving the rest of the pool.";

#[tokio::test]
async fn ingest_retrieve_answer_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = open_pipeline(&dir).await;

    let report = pipeline
        .ingest(OWNERSHIP_DOC.as_bytes(), DocumentFormat::Markdown, "ownership.md")
        .await
        .unwrap();
    assert!(report.chunks >= 1);
    assert_eq!(report.chunks, report.records);

    pipeline
        .ingest(RUNTIME_DOC.as_bytes(), DocumentFormat::Markdown, "runtime.md")
        .await
        .unwrap();

    let context = pipeline
        .retrieve("how does borrowing interact with ownership")
        .await
        .unwrap();
    assert!(!context.entries.is_empty());
    assert!(context.total_tokens <= 1000);
    assert!(context.providers_failed.is_empty());

    let generated = pipeline
        .answer(
            "Context:\n{context}\n\nQuestion: {query}",
            "how does borrowing interact with ownership",
        )
        .await
        .unwrap();
    assert_eq!(generated.attempts, 1);
    assert!(generated.text.contains("Question: how does borrowing interact with ownership"));
    assert!(generated.text.contains("(source: "));
}

#[tokio::test]
async fn reingesting_the_same_document_does_not_duplicate_records() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = open_pipeline(&dir).await;

    let first = pipeline
        .ingest(OWNERSHIP_DOC.as_bytes(), DocumentFormat::Markdown, "ownership.md")
        .await
        .unwrap();
    let second = pipeline
        .ingest(OWNERSHIP_DOC.as_bytes(), DocumentFormat::Markdown, "ownership.md")
        .await
        .unwrap();

    assert_eq!(first.document_id, second.document_id);
    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.records, first.records);
}

#[tokio::test]
async fn forget_removes_every_record_of_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = open_pipeline(&dir).await;

    let report = pipeline
        .ingest(OWNERSHIP_DOC.as_bytes(), DocumentFormat::Markdown, "ownership.md")
        .await
        .unwrap();
    pipeline
        .ingest(RUNTIME_DOC.as_bytes(), DocumentFormat::Markdown, "runtime.md")
        .await
        .unwrap();

    let removed = pipeline.forget(&report.document_id).await.unwrap();
    assert_eq!(removed, report.records);

    let context = pipeline.retrieve("single owner of a value").await.unwrap();
    assert!(context.entries.iter().all(|e| e.source != "ownership.md"));
}

#[tokio::test]
async fn answer_without_a_generator_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::open(
        &local_config(),
        Arc::new(FoldEmbedder { dimension: 16 }),
        None,
        &dir.path().join("index.db"),
    )
    .await
    .unwrap();

    let err = pipeline.answer("{query}", "anything").await.unwrap_err();
    assert!(matches!(err, RagError::Config(_)));
}

#[tokio::test]
async fn reopening_the_database_preserves_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("index.db");

    {
        let pipeline = Pipeline::open(
            &local_config(),
            Arc::new(FoldEmbedder { dimension: 16 }),
            None,
            &db,
        )
        .await
        .unwrap();
        pipeline
            .ingest(RUNTIME_DOC.as_bytes(), DocumentFormat::Markdown, "runtime.md")
            .await
            .unwrap();
    }

    let reopened = Pipeline::open(
        &local_config(),
        Arc::new(FoldEmbedder { dimension: 16 }),
        None,
        &db,
    )
    .await
    .unwrap();

    let context = reopened
        .retrieve("async task scheduling on worker threads")
        .await
        .unwrap();
    assert!(context.entries.iter().any(|e| e.source == "runtime.md"));
}
