//! Search provider implementations.
//!
//! Each provider implements the same narrow contract: a query in, a list of
//! (url, title, snippet) hits out, bounded by a caller-supplied timeout.
//! Providers are selected by configuration (`ProviderKind`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::ProviderKind;
use crate::core::errors::RagError;

/// One hit from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub provider_id: String,
    /// Canonical URL, used for cross-provider dedup.
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Stable identifier, also the cache key prefix.
    fn id(&self) -> &str;

    /// Run one search, bounded by `timeout`.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, RagError>;
}

/// Instantiate providers from configuration, sharing one HTTP client.
pub fn build_providers(kinds: &[ProviderKind], client: &Client) -> Vec<Arc<dyn SearchProvider>> {
    kinds
        .iter()
        .map(|kind| match kind {
            ProviderKind::Google { api_key, engine_id } => Arc::new(GoogleProvider {
                api_key: api_key.clone(),
                engine_id: engine_id.clone(),
                client: client.clone(),
            }) as Arc<dyn SearchProvider>,
            ProviderKind::DuckDuckGo => Arc::new(DuckDuckGoProvider {
                client: client.clone(),
            }),
            ProviderKind::Custom { endpoint, api_key } => Arc::new(CustomProvider {
                endpoint: endpoint.clone(),
                api_key: api_key.clone(),
                client: client.clone(),
            }),
        })
        .collect()
}

fn classify_send_error(err: reqwest::Error) -> RagError {
    if err.is_timeout() || err.is_connect() {
        RagError::transient(err)
    } else {
        RagError::provider(err)
    }
}

fn classify_status(provider: &str, status: reqwest::StatusCode) -> RagError {
    if status.is_server_error() {
        RagError::Transient(format!("{provider} search failed: {status}"))
    } else {
        RagError::Provider(format!("{provider} search failed: {status}"))
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

// ---------------------------------------------------------------------------
// Google (Custom Search JSON API)
// ---------------------------------------------------------------------------

pub struct GoogleProvider {
    api_key: String,
    engine_id: String,
    client: Client,
}

#[async_trait]
impl SearchProvider for GoogleProvider {
    fn id(&self) -> &str {
        "google"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "https://www.googleapis.com/customsearch/v1?key={}&cx={}&num={}&q={}",
            self.api_key,
            self.engine_id,
            max_results.min(10),
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            return Err(classify_status("google", response.status()));
        }

        let payload: Value = response.json().await.map_err(RagError::provider)?;
        let items = payload
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let now = Utc::now();
        let mut results = Vec::new();
        for item in items.iter().take(max_results) {
            let title = str_field(item, "title");
            let url = str_field(item, "link");
            let snippet = str_field(item, "snippet");
            if !title.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    provider_id: self.id().to_string(),
                    url,
                    title,
                    snippet,
                    fetched_at: now,
                });
            }
        }

        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// DuckDuckGo (Instant Answer API)
// ---------------------------------------------------------------------------

pub struct DuckDuckGoProvider {
    client: Client,
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn id(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_redirect=1&no_html=1",
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            return Err(classify_status("duckduckgo", response.status()));
        }

        let payload: Value = response.json().await.map_err(RagError::provider)?;
        let now = Utc::now();
        let mut results = Vec::new();

        if let (Some(text), Some(url)) = (
            payload.get("AbstractText").and_then(|v| v.as_str()),
            payload.get("AbstractURL").and_then(|v| v.as_str()),
        ) {
            if !text.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    provider_id: self.id().to_string(),
                    url: url.to_string(),
                    title: text.split(" - ").next().unwrap_or(text).to_string(),
                    snippet: text.to_string(),
                    fetched_at: now,
                });
            }
        }

        if let Some(items) = payload.get("Results").and_then(|v| v.as_array()) {
            extract_topics(items, now, &mut results);
        }
        if let Some(items) = payload.get("RelatedTopics").and_then(|v| v.as_array()) {
            extract_topics(items, now, &mut results);
        }

        results.truncate(max_results);
        Ok(results)
    }
}

/// Flatten DuckDuckGo's nested topic groups into plain results.
fn extract_topics(items: &[Value], fetched_at: DateTime<Utc>, results: &mut Vec<SearchResult>) {
    for item in items {
        if let Some(topics) = item.get("Topics").and_then(|v| v.as_array()) {
            extract_topics(topics, fetched_at, results);
            continue;
        }
        let text = item.get("Text").and_then(|v| v.as_str()).unwrap_or("");
        let url = item.get("FirstURL").and_then(|v| v.as_str()).unwrap_or("");
        if text.is_empty() || url.is_empty() {
            continue;
        }
        results.push(SearchResult {
            provider_id: "duckduckgo".to_string(),
            url: url.to_string(),
            title: text.split(" - ").next().unwrap_or(text).to_string(),
            snippet: text.to_string(),
            fetched_at,
        });
    }
}

// ---------------------------------------------------------------------------
// Custom endpoint
// ---------------------------------------------------------------------------

/// A self-hosted or third-party engine exposing
/// `GET <endpoint>?q=..&num=..&api_key=..` returning
/// `{"results": [{"title", "url", "snippet"}]}`.
pub struct CustomProvider {
    endpoint: String,
    api_key: String,
    client: Client,
}

#[async_trait]
impl SearchProvider for CustomProvider {
    fn id(&self) -> &str {
        "custom"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "{}?q={}&num={}&api_key={}",
            self.endpoint,
            urlencoding::encode(query),
            max_results,
            urlencoding::encode(&self.api_key)
        );

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            return Err(classify_status("custom", response.status()));
        }

        let payload: Value = response.json().await.map_err(RagError::provider)?;
        let items = payload
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let now = Utc::now();
        let mut results = Vec::new();
        for item in items.iter().take(max_results) {
            let title = str_field(item, "title");
            let url = str_field(item, "url");
            let snippet = str_field(item, "snippet");
            if !title.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    provider_id: self.id().to_string(),
                    url,
                    title,
                    snippet,
                    fetched_at: now,
                });
            }
        }

        Ok(results)
    }
}
