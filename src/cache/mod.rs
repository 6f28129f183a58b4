//! Response cache
//!
//! Two backends behind one async trait: an in-process map with TTL and a
//! size threshold, and Redis. Redis is optional; when it cannot be reached
//! at startup the in-process cache takes over.

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use crate::config::CacheConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    async fn delete(&self, key: &str);

    /// Short backend name for logs and the health endpoint
    fn backend(&self) -> &'static str;
}

/// Pick the configured backend, falling back to memory when Redis is down
pub async fn build_cache(config: &CacheConfig) -> Arc<dyn Cache> {
    if let Some(url) = config.resolved_redis_url().filter(|_| config.is_redis()) {
        match RedisCache::connect(&url).await {
            Ok(cache) => {
                info!("🧰 Cache backend: redis");
                return Arc::new(cache);
            }
            Err(e) => {
                warn!(
                    "⚠️ Redis unavailable ({}), falling back to in-memory cache",
                    e
                );
            }
        }
    }
    info!("🧰 Cache backend: simple (threshold {})", config.threshold);
    Arc::new(MemoryCache::new(config.threshold))
}

/// Store a JSON-serializable value
pub async fn set_json<T: serde::Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => warn!("Could not serialize cache entry {}: {}", key, e),
    }
}

/// Fetch and decode a JSON value; undecodable entries count as misses
pub async fn get_json<T: serde::de::DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    serde_json::from_str(&raw).ok()
}
