use thiserror::Error;

/// Error taxonomy for the retrieval pipeline.
///
/// Recoverable errors (`ParseFailure`, `UnsupportedFormat`, `RateLimited`,
/// `AllProvidersUnavailable`) are absorbed where a partial result is still
/// useful. `Transient` provider errors are retried internally; `Provider`
/// errors surface immediately. `Config` and `DimensionMismatch` are fatal
/// at startup.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("parse failure: {0}")]
    ParseFailure(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("rate limited: provider '{0}'")]
    RateLimited(String),
    #[error("all search providers unavailable")]
    AllProvidersUnavailable,
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        RagError::Storage(err.to_string())
    }

    pub fn transient<E: std::fmt::Display>(err: E) -> Self {
        RagError::Transient(err.to_string())
    }

    pub fn provider<E: std::fmt::Display>(err: E) -> Self {
        RagError::Provider(err.to_string())
    }

    /// Whether a retry may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient(_) | RagError::RateLimited(_))
    }

    /// Whether the pipeline can degrade instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RagError::Config(_) | RagError::DimensionMismatch { .. }
        )
    }
}
