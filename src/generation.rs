//! Generation gateway.
//!
//! Wraps a completion provider with prompt assembly, input-size trimming,
//! and retry with exponential backoff plus jitter. Only transient failures
//! are retried; provider rejections surface immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::config::GenerationConfig;
use crate::core::errors::RagError;
use crate::retrieval::{estimate_tokens, RetrievalContext};

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a completion for a fully assembled prompt.
    async fn complete(&self, prompt: &str) -> Result<String, RagError>;
}

/// A completion together with how many attempts it took.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub attempts: u32,
}

pub struct GenerationGateway {
    provider: Arc<dyn GenerationProvider>,
    config: GenerationConfig,
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: &GenerationConfig) -> Self {
        Self {
            provider,
            config: config.clone(),
        }
    }

    /// Fill `{context}` and `{query}` in the template and run the provider.
    ///
    /// When the assembled context would push the prompt past the input
    /// limit, the lowest-scored entries are dropped first. Transient
    /// failures retry up to `max_retries` times with exponential backoff
    /// and jitter.
    pub async fn generate(
        &self,
        template: &str,
        context: &RetrievalContext,
        query: &str,
    ) -> Result<GeneratedText, RagError> {
        let prompt = self.build_prompt(template, context, query);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.provider.complete(&prompt).await {
                Ok(text) => {
                    tracing::debug!(
                        "generation succeeded on attempt {} via {}",
                        attempt,
                        self.provider.name()
                    );
                    return Ok(GeneratedText { text, attempts: attempt });
                }
                Err(err) if err.is_transient() && attempt <= self.config.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "generation attempt {} failed ({}), retrying in {:?}",
                        attempt,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Base * 2^(attempt-1), plus up to one base interval of jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms;
        let backoff = base.saturating_mul(1u64 << (attempt - 1).min(16));
        let jitter = rand::rng().random_range(0..=base);
        Duration::from_millis(backoff + jitter)
    }

    /// Substitute template slots, trimming the context to the input limit.
    ///
    /// The fixed parts of the prompt (template text and query) are charged
    /// against the limit first; context entries fill what remains in score
    /// order, so trimming always discards the lowest-scored entries.
    fn build_prompt(&self, template: &str, context: &RetrievalContext, query: &str) -> String {
        let skeleton_tokens =
            estimate_tokens(&template.replace("{context}", "").replace("{query}", ""))
                + estimate_tokens(query);
        let budget = self.config.max_input_tokens.saturating_sub(skeleton_tokens);

        let mut kept = 0usize;
        let mut used = 0usize;
        for entry in &context.entries {
            if used + entry.tokens > budget {
                break;
            }
            used += entry.tokens;
            kept += 1;
        }
        if kept < context.entries.len() {
            tracing::debug!(
                "trimmed context from {} to {} entries for the input limit",
                context.entries.len(),
                kept
            );
        }

        let trimmed = RetrievalContext {
            entries: context.entries[..kept].to_vec(),
            total_tokens: used,
            truncated: context.truncated || kept < context.entries.len(),
            providers_failed: context.providers_failed.clone(),
        };

        template
            .replace("{context}", &trimmed.render())
            .replace("{query}", query)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completion provider
// ---------------------------------------------------------------------------

/// Talks to any server exposing the OpenAI `/v1/chat/completions` shape,
/// such as a local inference server.
pub struct OpenAiCompatGenerator {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatGenerator {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, prompt: &str) -> Result<String, RagError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                RagError::transient(err)
            } else {
                RagError::provider(err)
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RagError::Transient(format!("completion failed: {status}")));
        }
        if !status.is_success() {
            return Err(RagError::Provider(format!("completion failed: {status}")));
        }

        let payload: Value = response.json().await.map_err(RagError::provider)?;
        let text = payload
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| RagError::Provider("completion response had no content".into()))?;

        Ok(text.to_string())
    }
}
