//! Multi-provider search aggregation.
//!
//! Fans a query out to the configured providers concurrently, deduplicates
//! hits by canonical URL, caches aggregated results per provider, and
//! throttles each provider with its own token bucket.

pub mod cache;
pub mod provider;
pub mod rate;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;

use crate::core::config::SearchConfig;
use crate::core::errors::RagError;
use cache::SearchCache;
use provider::{build_providers, SearchProvider, SearchResult};
use rate::RateLimiter;

/// Aggregated hits for one query.
///
/// `providers_failed` is non-empty for partial results: some providers
/// errored or timed out, but at least one answered.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub results: Vec<SearchResult>,
    pub providers_failed: Vec<String>,
}

pub struct SearchAggregator {
    providers: Vec<Arc<dyn SearchProvider>>,
    cache: SearchCache,
    limiter: RateLimiter,
    max_results: usize,
    call_timeout: Duration,
    queue_wait: Duration,
}

impl SearchAggregator {
    pub fn new(config: &SearchConfig, client: &Client) -> Self {
        Self::with_providers(build_providers(&config.providers, client), config)
    }

    /// Build over explicit provider instances. Order is priority order: it
    /// decides dedup attribution and merge position.
    pub fn with_providers(providers: Vec<Arc<dyn SearchProvider>>, config: &SearchConfig) -> Self {
        Self {
            providers,
            cache: SearchCache::new(Duration::from_secs(config.cache_ttl_seconds)),
            limiter: RateLimiter::new(&config.rate_limit),
            max_results: config.max_results,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            queue_wait: Duration::from_millis(config.queue_wait_ms),
        }
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    /// Query every configured provider.
    pub async fn search(&self, query: &str) -> Result<AggregatedResult, RagError> {
        self.search_providers(query, None).await
    }

    /// Query a subset of providers by id (or all when `only` is `None`).
    ///
    /// Cache hits within the TTL are served without contacting the provider.
    /// Misses fan out concurrently, each call gated by the provider's token
    /// bucket and bounded by the per-call timeout. Failures degrade to a
    /// partial result; only a total failure is an error.
    pub async fn search_providers(
        &self,
        query: &str,
        only: Option<&[&str]>,
    ) -> Result<AggregatedResult, RagError> {
        let normalized = normalize_query(query);

        let selected: Vec<&Arc<dyn SearchProvider>> = self
            .providers
            .iter()
            .filter(|p| only.map_or(true, |ids| ids.contains(&p.id())))
            .collect();
        if selected.is_empty() {
            return Err(RagError::AllProvidersUnavailable);
        }

        let mut slots: Vec<Option<Vec<SearchResult>>> = selected
            .iter()
            .map(|p| self.cache.get(&SearchCache::key(p.id(), &normalized)))
            .collect();

        let calls: Vec<_> = selected
            .iter()
            .enumerate()
            .filter(|(i, _)| slots[*i].is_none())
            .map(|(i, p)| {
                let provider = Arc::clone(p);
                let query = normalized.clone();
                async move {
                    let outcome = self.call_provider(provider.as_ref(), &query).await;
                    (i, outcome)
                }
            })
            .collect();

        let mut providers_failed = Vec::new();
        for (i, outcome) in join_all(calls).await {
            match outcome {
                Ok(results) => {
                    self.cache.put(
                        SearchCache::key(selected[i].id(), &normalized),
                        results.clone(),
                    );
                    slots[i] = Some(results);
                }
                Err(err) => {
                    tracing::warn!("provider '{}' failed: {}", selected[i].id(), err);
                    providers_failed.push(selected[i].id().to_string());
                }
            }
        }

        if slots.iter().all(Option::is_none) {
            return Err(RagError::AllProvidersUnavailable);
        }

        // Merge in provider priority order, keeping per-provider order as the
        // secondary key. First provider to report a URL keeps it.
        let mut seen: HashSet<String> = HashSet::new();
        let mut merged = Vec::new();
        for slot in slots.into_iter().flatten() {
            for result in slot {
                if seen.insert(result.url.clone()) {
                    merged.push(result);
                }
            }
        }

        Ok(AggregatedResult {
            results: merged,
            providers_failed,
        })
    }

    async fn call_provider(
        &self,
        provider: &dyn SearchProvider,
        query: &str,
    ) -> Result<Vec<SearchResult>, RagError> {
        self.limiter.acquire(provider.id(), self.queue_wait).await?;

        match tokio::time::timeout(
            self.call_timeout,
            provider.search(query, self.max_results, self.call_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RagError::Transient(format!(
                "provider '{}' timed out",
                provider.id()
            ))),
        }
    }
}

/// Case-fold, trim, and collapse whitespace so equivalent queries share a
/// cache key.
pub fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::core::config::RateLimitConfig;

    struct StaticProvider {
        id: String,
        urls: Vec<String>,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(id: &str, urls: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                urls: urls.iter().map(|u| u.to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SearchProvider for StaticProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn search(
            &self,
            query: &str,
            _max_results: usize,
            _timeout: Duration,
        ) -> Result<Vec<SearchResult>, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .urls
                .iter()
                .map(|url| SearchResult {
                    provider_id: self.id.clone(),
                    url: url.clone(),
                    title: format!("{url} about {query}"),
                    snippet: format!("snippet for {url}"),
                    fetched_at: Utc::now(),
                })
                .collect())
        }
    }

    struct FailingProvider {
        id: String,
    }

    #[async_trait]
    impl SearchProvider for FailingProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _timeout: Duration,
        ) -> Result<Vec<SearchResult>, RagError> {
            Err(RagError::transient("connection refused"))
        }
    }

    fn test_config(cache_ttl_seconds: u64) -> SearchConfig {
        SearchConfig {
            cache_ttl_seconds,
            queue_wait_ms: 0,
            rate_limit: RateLimitConfig {
                tokens_per_second: 10_000.0,
                burst: 1_000,
            },
            ..SearchConfig::default()
        }
    }

    #[tokio::test]
    async fn dedup_keeps_first_seen_provider_attribution() {
        let a = StaticProvider::new(
            "a",
            &[
                "https://x.example",
                "https://a1.example",
                "https://a2.example",
                "https://a3.example",
                "https://a4.example",
            ],
        );
        let b = StaticProvider::new(
            "b",
            &["https://b1.example", "https://x.example", "https://b2.example"],
        );
        let aggregator =
            SearchAggregator::with_providers(vec![a.clone(), b.clone()], &test_config(60));

        let aggregated = aggregator.search("shared url").await.unwrap();

        assert_eq!(aggregated.results.len(), 7);
        assert!(aggregated.providers_failed.is_empty());
        let x = aggregated
            .results
            .iter()
            .find(|r| r.url == "https://x.example")
            .expect("shared url present");
        assert_eq!(x.provider_id, "a");
    }

    #[tokio::test]
    async fn provider_priority_order_is_the_merge_order() {
        let a = StaticProvider::new("a", &["https://a1.example", "https://a2.example"]);
        let b = StaticProvider::new("b", &["https://b1.example"]);
        let aggregator = SearchAggregator::with_providers(vec![a, b], &test_config(60));

        let aggregated = aggregator.search("ordering").await.unwrap();
        let urls: Vec<&str> = aggregated.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a1.example", "https://a2.example", "https://b1.example"]
        );
    }

    #[tokio::test]
    async fn cache_hit_within_ttl_skips_the_provider() {
        let provider = StaticProvider::new("a", &["https://a1.example"]);
        let aggregator = SearchAggregator::with_providers(vec![provider.clone()], &test_config(60));

        let first = aggregator.search("Rust   Async").await.unwrap();
        // Same query modulo case and whitespace: normalized key must hit.
        let second = aggregator.search("  rust async ").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.results, second.results);
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_a_new_provider_call() {
        let provider = StaticProvider::new("a", &["https://a1.example"]);
        let mut config = test_config(0);
        config.cache_ttl_seconds = 0;
        let aggregator = SearchAggregator::with_providers(vec![provider.clone()], &config);

        aggregator.search("q").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        aggregator.search("q").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn partial_failure_returns_results_with_failed_list() {
        let a = StaticProvider::new("a", &["https://a1.example"]);
        let b = Arc::new(FailingProvider { id: "b".into() });
        let aggregator = SearchAggregator::with_providers(vec![a, b], &test_config(60));

        let aggregated = aggregator.search("q").await.unwrap();
        assert_eq!(aggregated.results.len(), 1);
        assert_eq!(aggregated.providers_failed, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn total_failure_is_all_providers_unavailable() {
        let a = Arc::new(FailingProvider { id: "a".into() });
        let b = Arc::new(FailingProvider { id: "b".into() });
        let aggregator = SearchAggregator::with_providers(vec![a, b], &test_config(60));

        let err = aggregator.search("q").await.unwrap_err();
        assert!(matches!(err, RagError::AllProvidersUnavailable));
    }

    #[tokio::test]
    async fn exhausted_bucket_with_no_queue_room_rejects_the_call() {
        let provider = StaticProvider::new("a", &["https://a1.example"]);
        let mut config = test_config(0);
        config.rate_limit = RateLimitConfig {
            tokens_per_second: 0.1,
            burst: 1,
        };
        let aggregator = SearchAggregator::with_providers(vec![provider.clone()], &config);

        aggregator.search("first").await.unwrap();
        // Different query, so the cache cannot serve it; the bucket is empty
        // and the bounded wait is zero.
        let err = aggregator.search("second").await.unwrap_err();
        assert!(matches!(err, RagError::AllProvidersUnavailable));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn query_normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize_query("  Rust\t ASYNC  runtime "), "rust async runtime");
    }
}
