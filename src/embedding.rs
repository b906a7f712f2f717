//! Embedding provider interface.
//!
//! The index depends on a narrow `embed(text) -> vector` contract; the
//! concrete model behind it is pluggable. `OpenAiCompatEmbedder` talks to
//! any server exposing the `/v1/embeddings` shape.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::errors::RagError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Output vector width. All vectors in one index share this dimension.
    fn dimension(&self) -> usize;

    /// Embed one text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

/// Embedding client for OpenAI-compatible endpoints.
pub struct OpenAiCompatEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    client: Client,
}

impl OpenAiCompatEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            dimension,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbedder {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        // Connection failures and timeouts may succeed on retry.
        let res = request.send().await.map_err(RagError::transient)?;

        let status = res.status();
        if status.is_server_error() {
            return Err(RagError::Transient(format!("embedding server: {status}")));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Provider(format!("embedding failed ({status}): {text}")));
        }

        let payload: Value = res.json().await.map_err(RagError::provider)?;
        let vector: Vec<f32> = payload
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|e| e.get("embedding"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|x| x.as_f64())
                    .map(|x| x as f32)
                    .collect()
            })
            .ok_or_else(|| RagError::Provider("malformed embedding response".into()))?;

        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
