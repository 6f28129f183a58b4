//! Live positions of connected map clients
//!
//! Each WebSocket connection owns at most one position. Every change is
//! pushed to all connections as a full `positions` snapshot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    pub username: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: String,
}

/// Snapshot pushed to every client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionsMessage {
    Positions { positions: Vec<LivePosition> },
}

/// Positions keyed by connection id
#[derive(Debug, Clone, Default)]
pub struct LivePositions {
    inner: Arc<RwLock<BTreeMap<String, LivePosition>>>,
}

impl LivePositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, connection: &str, username: &str, lat: f64, lon: f64) {
        let position = LivePosition {
            username: username.to_string(),
            lat,
            lon,
            timestamp: Utc::now().to_rfc3339(),
        };
        self.inner
            .write()
            .await
            .insert(connection.to_string(), position);
    }

    /// Drop a connection's position; true when it had one
    pub async fn remove(&self, connection: &str) -> bool {
        self.inner.write().await.remove(connection).is_some()
    }

    pub async fn snapshot(&self) -> Vec<LivePosition> {
        self.inner.read().await.values().cloned().collect()
    }
}

/// Channel for broadcasting position snapshots to WebSocket clients
#[derive(Debug, Clone)]
pub struct PositionBroadcaster {
    tx: broadcast::Sender<String>,
}

impl PositionBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, msg: &PositionsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            // No receivers is fine
            let _ = self.tx.send(json);
        }
    }

    pub async fn broadcast_positions(&self, live: &LivePositions) {
        self.broadcast(&PositionsMessage::Positions {
            positions: live.snapshot().await,
        });
    }
}

impl Default for PositionBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_and_remove() {
        let live = LivePositions::new();
        live.update("c1", "ama", 5.3, -4.0).await;
        live.update("c2", "kofi", 6.8, -5.2).await;
        live.update("c1", "ama", 5.4, -4.1).await;

        let snap = live.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].lat, 5.4);

        assert!(live.remove("c1").await);
        assert!(!live.remove("c1").await);
        assert_eq!(live.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_snapshot() {
        let live = LivePositions::new();
        let broadcaster = PositionBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        live.update("c1", "ama", 5.3, -4.0).await;
        broadcaster.broadcast_positions(&live).await;

        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "positions");
        assert_eq!(msg["positions"][0]["username"], "ama");
    }

    #[test]
    fn test_broadcast_without_receivers() {
        PositionBroadcaster::new(4).broadcast(&PositionsMessage::Positions { positions: vec![] });
    }
}
