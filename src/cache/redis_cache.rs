use super::Cache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::warn;

const KEY_PREFIX: &str = "boursa:";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Redis-backed cache shared between server processes
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect and PING once so a dead server is caught at startup
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let mut conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_multiplexed_async_connection(),
        )
        .await
        .context("Redis connection timed out")?
        .context("Redis connection failed")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(Self { conn })
    }

    fn key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(Self::key(key)).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Redis GET {} failed: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        if let Err(e) = conn.set_ex::<_, _, ()>(Self::key(key), value, secs).await {
            warn!("Redis SET {} failed: {}", key, e);
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(Self::key(key)).await {
            warn!("Redis DEL {} failed: {}", key, e);
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed() {
        assert_eq!(RedisCache::key("stock_api:yahoo"), "boursa:stock_api:yahoo");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(RedisCache::connect("not a url").await.is_err());
    }
}
