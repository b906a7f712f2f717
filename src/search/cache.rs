//! TTL cache for aggregated search results.
//!
//! Keys are `provider_id:normalized_query`. Entries are readable before
//! expiry only; writes happen on miss after a successful provider call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::provider::SearchResult;

struct CacheEntry {
    results: Vec<SearchResult>,
    expires_at: Instant,
}

pub struct SearchCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key(provider_id: &str, normalized_query: &str) -> String {
        format!("{provider_id}:{normalized_query}")
    }

    /// Cached results, if present and fresh. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.results.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, results: Vec<SearchResult>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                results,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}
