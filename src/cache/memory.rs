use super::Cache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Slot {
    value: String,
    expires_at: Instant,
}

/// In-process cache with per-entry TTL and an entry-count threshold
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Slot>>,
    threshold: usize,
}

impl MemoryCache {
    pub fn new(threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            threshold: threshold.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(slot) if slot.expires_at > now => return Some(slot.value.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        self.entries.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.threshold {
            entries.retain(|_, slot| slot.expires_at > now);
            if entries.len() >= self.threshold {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, slot)| slot.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    entries.remove(&k);
                }
            }
        }
        entries.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: now + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    fn backend(&self) -> &'static str {
        "simple"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = MemoryCache::new(10);
        assert!(cache.get("a").await.is_none());
        cache.set("a", "1".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await.as_deref(), Some("1"));
        cache.delete("a").await;
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new(10);
        cache.set("a", "1".into(), Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_threshold_evicts_soonest_expiry() {
        let cache = MemoryCache::new(2);
        cache.set("short", "1".into(), Duration::from_secs(5)).await;
        cache.set("long", "2".into(), Duration::from_secs(500)).await;
        cache.set("new", "3".into(), Duration::from_secs(50)).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("short").await.is_none());
        assert!(cache.get("long").await.is_some());
        assert!(cache.get("new").await.is_some());
    }

    #[tokio::test]
    async fn test_threshold_prefers_purging_expired() {
        let cache = MemoryCache::new(2);
        cache.set("stale", "1".into(), Duration::from_millis(1)).await;
        cache.set("keep", "2".into(), Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.set("new", "3".into(), Duration::from_secs(50)).await;
        assert!(cache.get("keep").await.is_some());
        assert!(cache.get("new").await.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_at_threshold_keeps_others() {
        let cache = MemoryCache::new(2);
        cache.set("a", "1".into(), Duration::from_secs(5)).await;
        cache.set("b", "2".into(), Duration::from_secs(50)).await;
        cache.set("a", "3".into(), Duration::from_secs(5)).await;
        assert_eq!(cache.get("a").await.as_deref(), Some("3"));
        assert!(cache.get("b").await.is_some());
    }
}
