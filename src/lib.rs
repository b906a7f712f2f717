//! ragpipe: a retrieval-augmented generation pipeline.
//!
//! Documents are chunked and embedded into a SQLite-backed vector index;
//! queries fan out to the local index and (optionally) web search providers,
//! get merged into a token-bounded context, and feed a completion provider
//! behind a retrying gateway.
//!
//! [`pipeline::Pipeline`] is the assembled entry point; the individual
//! stages are usable on their own.

pub mod core;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod processor;
pub mod retrieval;
pub mod search;

pub use crate::core::config::RagConfig;
pub use crate::core::errors::RagError;
pub use crate::embedding::EmbeddingProvider;
pub use crate::generation::{GeneratedText, GenerationProvider};
pub use crate::index::VectorIndex;
pub use crate::pipeline::{IngestReport, Pipeline, PipelineStats};
pub use crate::processor::{DocumentFormat, DocumentProcessor};
pub use crate::retrieval::RetrievalContext;
pub use crate::search::SearchAggregator;
