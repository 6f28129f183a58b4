//! SQLite storage
//!
//! One database file holds the user accounts and the map locations.
//! Schema creation is idempotent and missing columns are added in place.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and run migrations
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("🗄️ SQLite database opened at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                active_users INTEGER DEFAULT 1,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;

        // Columns added after the first release of the users table
        Self::migrate_add_column_if_missing(&conn, "users", "last_login", "TEXT")?;
        Self::migrate_add_column_if_missing(
            &conn,
            "users",
            "failed_login_attempts",
            "INTEGER NOT NULL DEFAULT 0",
        )?;
        Self::migrate_add_column_if_missing(&conn, "users", "locked_until", "TEXT")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Add `column` to `table` unless it already exists
    fn migrate_add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        column_def: &str,
    ) -> Result<(), StorageError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing_columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        if !existing_columns.iter().any(|c| c == column) {
            let alter_sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def);
            conn.execute(&alter_sql, [])?;
        }

        Ok(())
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().unwrap();
        Database::migrate_add_column_if_missing(&conn, "users", "last_login", "TEXT").unwrap();
        let cols: Vec<String> = conn
            .prepare("PRAGMA table_info(users)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(cols.iter().filter(|c| *c == "last_login").count(), 1);
        assert!(cols.iter().any(|c| c == "locked_until"));
    }

    #[test]
    fn test_open_file_creates_parent_dir() {
        let dir = std::env::temp_dir().join(format!("boursa_db_{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("app.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
