//! Map locations: saved user positions and live WebSocket positions

mod live;

pub use live::{LivePosition, LivePositions, PositionBroadcaster, PositionsMessage};

use crate::storage::{Database, StorageError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Sample positions inserted into an empty table
const SAMPLE_LOCATIONS: &[(&str, f64, f64, i64)] = &[
    ("Abidjan", 5.3600, -4.0083, 150),
    ("Yamoussoukro (Capitale)", 6.8270, -5.2893, 85),
    ("Bouaké", 7.6900, -5.0300, 42),
    ("Daloa", 6.8786, -6.4439, 28),
    ("Korhogo", 9.4577, -5.6281, 35),
    ("San-Pédro", 4.7506, -6.6349, 24),
    ("Gagnoa", 6.1333, -5.9500, 22),
    ("Duekoué", 6.7306, -7.3500, 18),
    ("Soubré", 6.1272, -6.1208, 20),
    ("Odienné", 9.5099, -7.5699, 15),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub username: String,
    pub lat: f64,
    pub lon: f64,
    pub active_users: i64,
    pub timestamp: Option<String>,
}

/// Latitude within ±90 and longitude within ±180
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[derive(Clone)]
pub struct LocationStore {
    db: Arc<Database>,
    seed: bool,
}

impl LocationStore {
    pub fn new(db: Arc<Database>, seed: bool) -> Self {
        Self { db, seed }
    }

    /// One row per username: the previous position is replaced
    pub fn save_user_location(
        &self,
        username: &str,
        lat: f64,
        lon: f64,
        active_users: i64,
    ) -> Result<(), StorageError> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_locations WHERE username = ?1", params![username])?;
        tx.execute(
            "INSERT INTO user_locations (username, latitude, longitude, active_users, timestamp)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
            params![username, lat, lon, active_users.max(1)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Every saved position, newest first. An empty table is seeded first
    /// when seeding is enabled.
    pub fn get_all_locations(&self) -> Result<Vec<Location>, StorageError> {
        let conn = self.db.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM user_locations", [], |row| row.get(0))?;
        if self.seed && count == 0 {
            let mut stmt = conn.prepare(
                "INSERT INTO user_locations (username, latitude, longitude, active_users) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (name, lat, lon, active) in SAMPLE_LOCATIONS {
                stmt.execute(params![name, lat, lon, active])?;
            }
            info!("🗺️ Seeded {} sample locations", SAMPLE_LOCATIONS.len());
        }

        let mut stmt = conn.prepare(
            "SELECT username, latitude, longitude, active_users, timestamp
             FROM user_locations ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Location {
                    username: row.get(0)?,
                    lat: row.get(1)?,
                    lon: row.get(2)?,
                    active_users: row.get::<_, Option<i64>>(3)?.unwrap_or(1),
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
