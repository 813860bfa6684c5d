//! Redis-backed cache

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

use super::ResultCache;
use crate::types::{Result, RisklineError};

/// Per-command deadline; a slow cache must not stall the response consumer
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct RedisResultCache {
    conn: ConnectionManager,
}

impl RedisResultCache {
    /// Connect and verify with `PING`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| RisklineError::CacheUnavailable(format!("Invalid Redis URL: {}", e)))?;

        let conn = timeout(COMMAND_TIMEOUT * 5, ConnectionManager::new(client))
            .await
            .map_err(|_| RisklineError::CacheUnavailable("Redis connect timed out".to_string()))?
            .map_err(|e| RisklineError::CacheUnavailable(format!("Redis connect failed: {}", e)))?;

        let cache = Self { conn };
        let pong: String = cache
            .run(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        info!(reply = %pong, "Connected to Redis");

        Ok(cache)
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(COMMAND_TIMEOUT, op(self.conn.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RisklineError::CacheUnavailable(e.to_string())),
            Err(_) => Err(RisklineError::CacheUnavailable("redis timeout".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl ResultCache for RedisResultCache {
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let key = key.to_string();
        let seconds = ttl.as_secs().max(1);
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, payload, seconds).await })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .run(|mut conn| async move { conn.get(key).await })
            .await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(RisklineError::from))
            .transpose()
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let key = key.to_string();
        // -2 = missing, -1 = no expiry
        let seconds: i64 = self
            .run(|mut conn| async move { conn.ttl(key).await })
            .await?;
        Ok(match seconds {
            s if s >= 0 => Some(Duration::from_secs(s as u64)),
            -1 => Some(Duration::MAX),
            _ => None,
        })
    }

    async fn close(&self) -> Result<()> {
        // ConnectionManager closes when the last clone drops
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
