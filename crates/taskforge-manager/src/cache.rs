//! Result cache memoizing completed task outputs.
//!
//! Keys are derived deterministically from task payload bytes, so
//! identical payloads share one entry. Expiry is checked at read time;
//! there is no background sweep. The cache is never persisted - it is
//! cold on every manager restart.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// Deterministic cache key for a payload.
pub fn payload_key(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

struct CacheEntry {
    result: Value,
    recorded_at: Instant,
}

/// TTL-bounded result cache.
pub struct ResultCache {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Look up a fresh result; entries older than the TTL are treated
    /// as absent and dropped.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if entry.recorded_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&mut self, key: String, result: Value) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                recorded_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_deterministic_and_payload_sensitive() {
        assert_eq!(payload_key(r#"{"n":1}"#), payload_key(r#"{"n":1}"#));
        assert_ne!(payload_key(r#"{"n":1}"#), payload_key(r#"{"n":2}"#));
    }

    #[tokio::test]
    async fn test_fresh_entry_hits() {
        let mut cache = ResultCache::new(Duration::from_secs(60));
        cache.set(payload_key("p"), json!({"ok": true}));
        assert_eq!(cache.get(&payload_key("p")), Some(json!({"ok": true})));
        assert!(cache.get(&payload_key("other")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_at_read_time() {
        let mut cache = ResultCache::new(Duration::from_secs(30));
        cache.set(payload_key("p"), json!(1));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get(&payload_key("p")).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&payload_key("p")).is_none());
        // the stale entry was dropped, not just hidden
        assert!(cache.is_empty());
    }
}
