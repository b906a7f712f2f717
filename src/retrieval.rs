//! Retrieval orchestration.
//!
//! Merges local index hits with freshly aggregated web results, ranks the
//! combined candidates, and assembles a token-bounded context. Web results
//! are chunked and embedded into the index as a side effect, so the index
//! keeps enriching itself without a separate ingestion step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;

use crate::core::config::{RagConfig, RetrievalConfig, ScoreWeights};
use crate::core::errors::RagError;
use crate::index::store::cosine_similarity;
use crate::index::VectorIndex;
use crate::processor::{strip_html_tags, DocumentFormat, DocumentProcessor};
use crate::search::provider::SearchResult;
use crate::search::{AggregatedResult, SearchAggregator};

/// Authority assigned to chunks from ingested documents.
const LOCAL_AUTHORITY: f64 = 1.0;
/// Authority assigned to chunks derived from web results.
const WEB_AUTHORITY: f64 = 0.5;
/// Recency decay time constant: one day old halves to ~0.37.
const RECENCY_TAU_SECS: f64 = 86_400.0;

/// Rough token estimate, ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// One ranked entry in an assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub text: String,
    pub score: f64,
    pub tokens: usize,
}

/// Output of orchestration for one query. Transient: nothing here is
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalContext {
    /// Entries in descending score order.
    pub entries: Vec<ContextEntry>,
    /// Always within the configured token budget.
    pub total_tokens: usize,
    /// True when at least one eligible candidate was excluded purely for
    /// budget reasons.
    pub truncated: bool,
    /// Providers that failed or were unreachable during aggregation.
    pub providers_failed: Vec<String>,
}

impl RetrievalContext {
    /// Format entries with source citations, highest score first.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            out.push_str(&format!(
                "[{}] (source: {}, score: {:.2})\n{}\n\n",
                i + 1,
                entry.source,
                entry.score,
                entry.text
            ));
        }
        out.trim_end().to_string()
    }
}

struct Candidate {
    chunk_id: String,
    document_id: String,
    source: String,
    text: String,
    similarity: f64,
    age_secs: f64,
    authority: f64,
}

impl Candidate {
    fn score(&self, weights: Option<&ScoreWeights>) -> f64 {
        match weights {
            Some(w) => {
                let recency = (-self.age_secs / RECENCY_TAU_SECS).exp();
                w.similarity * self.similarity + w.recency * recency + w.authority * self.authority
            }
            None => self.similarity,
        }
    }
}

/// Pure composition step: owns no persistent state of its own.
pub struct RetrievalOrchestrator {
    index: Arc<VectorIndex>,
    aggregator: Option<Arc<SearchAggregator>>,
    processor: DocumentProcessor,
    config: RetrievalConfig,
    client: Client,
}

impl RetrievalOrchestrator {
    pub fn new(
        config: &RagConfig,
        index: Arc<VectorIndex>,
        aggregator: Option<Arc<SearchAggregator>>,
    ) -> Self {
        Self {
            index,
            aggregator,
            processor: DocumentProcessor::new(&config.chunking),
            config: config.retrieval.clone(),
            client: Client::new(),
        }
    }

    /// Assemble a ranked, token-bounded context for a query.
    ///
    /// Local and web result sets are fully collected before scoring, so the
    /// final order is deterministic for identical inputs. A failed web
    /// aggregation degrades to local-only retrieval; only index-level errors
    /// abort.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalContext, RagError> {
        let query_vec = self.index.embed_query(query).await?;

        let (local, web) = tokio::join!(
            self.index.query_vector(&query_vec, self.config.k_local),
            self.aggregate_web(query),
        );
        let local = local?;

        let mut providers_failed = Vec::new();
        let mut web_candidates = Vec::new();
        match web {
            Some(Ok(aggregated)) => {
                providers_failed = aggregated.providers_failed.clone();
                web_candidates = self.index_web_results(&aggregated.results, &query_vec).await?;
            }
            Some(Err(err)) if err.is_recoverable() => {
                tracing::warn!("web aggregation unavailable, using local index only: {}", err);
                providers_failed = self
                    .aggregator
                    .as_ref()
                    .map(|a| a.provider_ids())
                    .unwrap_or_default();
            }
            Some(Err(err)) => return Err(err),
            None => {}
        }

        let now = Utc::now().timestamp();
        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for hit in local {
            let record = hit.record;
            candidates.insert(
                record.chunk_id.clone(),
                Candidate {
                    chunk_id: record.chunk_id,
                    document_id: record.document_id,
                    source: record.source,
                    text: record.content,
                    similarity: f64::from(hit.score),
                    age_secs: (now - record.created_at).max(0) as f64,
                    authority: LOCAL_AUTHORITY,
                },
            );
        }
        for candidate in web_candidates {
            // A web chunk already present locally keeps the higher similarity.
            match candidates.get(&candidate.chunk_id) {
                Some(existing) if existing.similarity >= candidate.similarity => {}
                _ => {
                    candidates.insert(candidate.chunk_id.clone(), candidate);
                }
            }
        }

        Ok(self.assemble(candidates.into_values().collect(), providers_failed))
    }

    async fn aggregate_web(&self, query: &str) -> Option<Result<AggregatedResult, RagError>> {
        let aggregator = self.aggregator.as_ref()?;
        let deadline = Duration::from_secs(self.config.query_timeout_secs);

        // The query-level timeout cancels all outstanding provider calls
        // for this query; cooperative, so in-flight responses are dropped.
        Some(match tokio::time::timeout(deadline, aggregator.search(query)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Transient("web aggregation timed out".into())),
        })
    }

    /// Chunk and embed web results so future queries can reuse them, and
    /// score the resulting records against the query vector.
    async fn index_web_results(
        &self,
        results: &[SearchResult],
        query_vec: &[f32],
    ) -> Result<Vec<Candidate>, RagError> {
        let now = Utc::now();
        let mut candidates = Vec::new();

        for result in results {
            let content = self.result_content(result).await;
            let document = match self.processor.process(
                content.as_bytes(),
                DocumentFormat::PlainText,
                &result.url,
            ) {
                Ok(document) => document,
                Err(err) => {
                    tracing::debug!("skipping web result {}: {}", result.url, err);
                    continue;
                }
            };

            let chunks = self.processor.chunk(&document);
            let records = match self.index.add(&chunks, &document.source).await {
                Ok(records) => records,
                Err(err) if err.is_recoverable() => {
                    tracing::warn!("could not index web result {}: {}", result.url, err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let age_secs = (now - result.fetched_at).num_seconds().max(0) as f64;
            for record in records {
                let similarity = f64::from(cosine_similarity(query_vec, &record.vector));
                candidates.push(Candidate {
                    chunk_id: record.chunk_id,
                    document_id: record.document_id,
                    source: record.source,
                    text: record.content,
                    similarity,
                    age_secs,
                    authority: WEB_AUTHORITY,
                });
            }
        }

        Ok(candidates)
    }

    /// Text to chunk for a web result: the fetched page when enrichment is
    /// on and the fetch succeeds, otherwise title plus snippet.
    async fn result_content(&self, result: &SearchResult) -> String {
        if self.config.fetch_content {
            match self.fetch_page(&result.url).await {
                Ok(text) if !text.is_empty() => return text,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!("page fetch failed for {}: {}", result.url, err);
                }
            }
        }
        format!("{}\n\n{}", result.title, result.snippet)
    }

    async fn fetch_page(&self, url: &str) -> Result<String, RagError> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.fetch_timeout_secs))
            .send()
            .await
            .map_err(RagError::transient)?;
        let body = response.text().await.map_err(RagError::transient)?;
        Ok(strip_html_tags(&body))
    }

    /// Hard-filter by similarity threshold, rank, and pack greedily under
    /// the token budget.
    fn assemble(&self, candidates: Vec<Candidate>, providers_failed: Vec<String>) -> RetrievalContext {
        let weights = self.config.weights.as_ref();

        let mut scored: Vec<(f64, Candidate)> = candidates
            .into_iter()
            .filter(|c| c.similarity >= self.config.similarity_threshold)
            .map(|c| (c.score(weights), c))
            .collect();
        // Ties break on chunk id so identical inputs rank identically.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
        });

        let mut entries = Vec::new();
        let mut total_tokens = 0usize;
        let mut truncated = false;
        for (score, candidate) in scored {
            let tokens = estimate_tokens(&candidate.text);
            if total_tokens + tokens > self.config.token_budget {
                truncated = true;
                break;
            }
            total_tokens += tokens;
            entries.push(ContextEntry {
                chunk_id: candidate.chunk_id,
                document_id: candidate.document_id,
                source: candidate.source,
                text: candidate.text,
                score,
                tokens,
            });
        }

        tracing::debug!(
            "assembled context: {} entries, {} tokens, truncated={}",
            entries.len(),
            total_tokens,
            truncated
        );

        RetrievalContext {
            entries,
            total_tokens,
            truncated,
            providers_failed,
        }
    }
}
