//! Pipeline configuration.
//!
//! One immutable [`RagConfig`] is constructed at startup (from YAML or
//! defaults), validated once, and passed by reference into each component's
//! constructor. Components never reach for ambient state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

/// Top-level configuration for the retrieval pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
}

/// DocumentProcessor chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Trailing fragments shorter than this merge into the previous chunk.
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
        }
    }
}

/// Vector index parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Expected embedding width. A persisted index with a different
    /// dimension is fatal until rebuilt.
    pub embedding_dimension: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 384,
        }
    }
}

/// Which external search provider to call, and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderKind {
    Google {
        api_key: String,
        engine_id: String,
    },
    DuckDuckGo,
    Custom {
        endpoint: String,
        #[serde(default)]
        api_key: String,
    },
}

impl ProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Google { .. } => "google",
            ProviderKind::DuckDuckGo => "duckduckgo",
            ProviderKind::Custom { .. } => "custom",
        }
    }
}

/// Per-provider token bucket parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Continuous refill rate, tokens per second.
    pub tokens_per_second: f64,
    /// Maximum burst size; tokens never accumulate past this.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: 1.0,
            burst: 3,
        }
    }
}

/// SearchAggregator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Whether web aggregation runs at all. When off, retrieval is
    /// local-index only.
    pub enabled: bool,
    /// Providers to query, in priority order.
    pub providers: Vec<ProviderKind>,
    /// Maximum results requested per provider.
    pub max_results: usize,
    /// Cache freshness window for aggregated results.
    pub cache_ttl_seconds: u64,
    /// Deadline for a single provider call.
    pub call_timeout_secs: u64,
    /// Bounded wait for a rate-bucket token before rejecting.
    pub queue_wait_ms: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            providers: vec![ProviderKind::DuckDuckGo],
            max_results: 10,
            cache_ttl_seconds: 300,
            call_timeout_secs: 10,
            queue_wait_ms: 500,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Ranking weights for combined retrieval scoring. When absent, ordering
/// falls back to similarity alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub recency: f64,
    pub authority: f64,
}

/// RetrievalOrchestrator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Local-index candidates per query.
    pub k_local: usize,
    /// Maximum context size in estimated tokens.
    pub token_budget: usize,
    /// Hard floor on candidate similarity.
    pub similarity_threshold: f64,
    pub weights: Option<ScoreWeights>,
    /// Query-level deadline covering the whole web aggregation.
    pub query_timeout_secs: u64,
    /// Fetch and strip result pages instead of using snippets.
    pub fetch_content: bool,
    /// Deadline for a single page fetch when `fetch_content` is on.
    pub fetch_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_local: 5,
            token_budget: 2000,
            similarity_threshold: 0.3,
            weights: None,
            query_timeout_secs: 20,
            fetch_content: false,
            fetch_timeout_secs: 10,
        }
    }
}

/// GenerationGateway retry policy and input cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum retries for transient provider failures.
    pub max_retries: u32,
    /// Exponential backoff base in milliseconds.
    pub backoff_base_ms: u64,
    /// Provider input cap; lowest-scored context entries trim first.
    pub max_input_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 250,
            max_input_tokens: 4000,
        }
    }
}

impl RagConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, RagError> {
        let config: RagConfig = serde_yaml::from_str(contents)
            .map_err(|e| RagError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, RagError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RagError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&contents)
    }

    /// Startup validation. Configuration-class errors are fatal here, never
    /// per-call.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.chunking.min_chunk_size == 0 || self.chunking.min_chunk_size > self.chunking.chunk_size {
            return Err(RagError::Config(format!(
                "min_chunk_size ({}) must be in 1..=chunk_size",
                self.chunking.min_chunk_size
            )));
        }
        if self.index.embedding_dimension == 0 {
            return Err(RagError::Config("embedding_dimension must be positive".into()));
        }
        if self.search.enabled && self.search.providers.is_empty() {
            return Err(RagError::Config(
                "search is enabled but no providers are configured".into(),
            ));
        }
        if self.search.rate_limit.tokens_per_second <= 0.0 {
            return Err(RagError::Config(
                "rate_limit.tokens_per_second must be positive".into(),
            ));
        }
        if self.search.rate_limit.burst == 0 {
            return Err(RagError::Config("rate_limit.burst must be positive".into()));
        }
        if self.retrieval.token_budget == 0 {
            return Err(RagError::Config("token_budget must be positive".into()));
        }
        Ok(())
    }
}
