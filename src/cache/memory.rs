//! In-process TTL cache

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::ResultCache;
use crate::types::{Result, RisklineError};

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// DashMap cache; expired entries are dropped on read and on every write
#[derive(Default)]
pub struct MemoryResultCache {
    entries: DashMap<String, Entry>,
    closed: AtomicBool,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RisklineError::CacheUnavailable("cache closed".to_string()));
        }
        Ok(())
    }

    fn live_entry<T>(&self, key: &str, read: impl FnOnce(&Entry) -> T) -> Option<T> {
        let now = Instant::now();
        let result = self
            .entries
            .get(key)
            .and_then(|entry| (entry.expires_at > now).then(|| read(entry.value())));
        if result.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        result
    }
}

#[async_trait::async_trait]
impl ResultCache for MemoryResultCache {
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        self.purge_expired();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.live_entry(key, |entry| entry.value.clone()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.ensure_open()?;
        Ok(self.live_entry(key, |entry| {
            entry.expires_at.saturating_duration_since(Instant::now())
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.entries.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_and_ttl() {
        let cache = MemoryResultCache::new();
        cache
            .put("whatif:job_1", &json!({"risk_score": 0.3}), Duration::from_secs(3600))
            .await
            .unwrap();

        let value = cache.get("whatif:job_1").await.unwrap().unwrap();
        assert_eq!(value["risk_score"], 0.3);

        let ttl = cache.ttl("whatif:job_1").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(3590) && ttl <= Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let cache = MemoryResultCache::new();
        cache
            .put("k", &json!(1), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.ttl("k").await.unwrap().is_none());
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_put_drops_unread_expired_entries() {
        let cache = MemoryResultCache::new();
        for key in ["whatif:a", "whatif:b"] {
            cache
                .put(key, &json!(1), Duration::from_millis(10))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache
            .put("whatif:c", &json!(2), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.entries.len(), 1);
        assert!(cache.entries.contains_key("whatif:c"));
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_writes() {
        let cache = MemoryResultCache::new();
        cache.close().await.unwrap();
        assert!(matches!(
            cache.put("k", &json!(1), Duration::from_secs(1)).await,
            Err(RisklineError::CacheUnavailable(_))
        ));
    }
}
