//! Per-provider token buckets.
//!
//! Buckets refill continuously at `tokens_per_second`, capped at `burst`.
//! Each bucket has its own lock; providers never contend with each other's
//! throttling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::config::RateLimitConfig;
use crate::core::errors::RagError;

#[derive(Debug)]
struct RateBucket {
    tokens: f64,
    burst: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.burst),
            burst: f64::from(config.burst),
            refill_rate: config.tokens_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.burst);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_consume(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(deficit / self.refill_rate))
    }
}

/// Throttle state for all providers, one bucket per provider id.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Arc<Mutex<RateBucket>>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config: config.clone(),
        }
    }

    fn bucket(&self, provider_id: &str) -> Arc<Mutex<RateBucket>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateBucket::new(&self.config))))
            .clone()
    }

    /// Consume one token for the provider, waiting at most `max_wait`.
    ///
    /// A request that cannot be served within the bounded wait is rejected
    /// with [`RagError::RateLimited`]; the caller decides whether that is
    /// fatal.
    pub async fn acquire(&self, provider_id: &str, max_wait: Duration) -> Result<(), RagError> {
        let bucket = self.bucket(provider_id);
        let deadline = Instant::now() + max_wait;

        loop {
            let wait = {
                let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
                match bucket.try_consume(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            if Instant::now() + wait > deadline {
                tracing::debug!("rate limit hit for provider '{}'", provider_id);
                return Err(RagError::RateLimited(provider_id.to_string()));
            }
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(tokens_per_second: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            tokens_per_second,
            burst,
        })
    }

    #[tokio::test]
    async fn burst_allows_exactly_burst_immediate_calls() {
        let limiter = limiter(1.0, 3);

        for _ in 0..3 {
            limiter.acquire("p", Duration::ZERO).await.unwrap();
        }
        let err = limiter.acquire("p", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, RagError::RateLimited(id) if id == "p"));
    }

    #[tokio::test]
    async fn bounded_wait_serves_a_deferred_call() {
        let limiter = limiter(50.0, 1);

        limiter.acquire("p", Duration::ZERO).await.unwrap();
        // One token refills in 20ms, well inside the allowed wait.
        limiter.acquire("p", Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn providers_have_independent_buckets() {
        let limiter = limiter(1.0, 1);

        limiter.acquire("a", Duration::ZERO).await.unwrap();
        limiter.acquire("b", Duration::ZERO).await.unwrap();
        assert!(limiter.acquire("a", Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn refill_is_capped_at_burst() {
        let limiter = limiter(100.0, 2);

        limiter.acquire("p", Duration::ZERO).await.unwrap();
        limiter.acquire("p", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 50ms at 100/s would refill 5 tokens, but the cap is 2.
        limiter.acquire("p", Duration::ZERO).await.unwrap();
        limiter.acquire("p", Duration::ZERO).await.unwrap();
        assert!(limiter.acquire("p", Duration::ZERO).await.is_err());
    }
}
