//! What-if result cache
//!
//! What-if results are never persisted as predictions. They live in a TTL
//! cache under `whatif:<job_id>` and simply disappear when the TTL runs out.
//! Redis backs the cache in deployment; the memory cache serves tests and
//! dev-mode runs without Redis.

mod memory;
mod redis_cache;

pub use self::memory::MemoryResultCache;
pub use self::redis_cache::RedisResultCache;

use serde_json::Value;
use std::time::Duration;

use crate::types::Result;

/// Key prefix for what-if results
pub const WHAT_IF_KEY_PREFIX: &str = "whatif:";

/// Cache key for a what-if job
pub fn what_if_key(job_id: &str) -> String {
    format!("{}{}", WHAT_IF_KEY_PREFIX, job_id)
}

#[async_trait::async_trait]
pub trait ResultCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous entry
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    /// `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Remaining lifetime; `None` when absent or expired
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Release connections; later calls may fail
    async fn close(&self) -> Result<()>;

    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_what_if_key() {
        assert_eq!(what_if_key("job_abc"), "whatif:job_abc");
    }
}
