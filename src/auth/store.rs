//! User accounts in SQLite

use super::{hash_password, Role, User};
use crate::storage::{Database, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_active, created_at, \
                            last_login, failed_login_attempts, locked_until";

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@boursa.local";

#[derive(Clone)]
pub struct UserStore {
    db: Arc<Database>,
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: Role::from_str(&role).unwrap_or(Role::User),
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: parse_ts(Some(created_at)).unwrap_or_else(Utc::now),
        last_login: parse_ts(row.get(7)?),
        failed_login_attempts: row.get::<_, i64>(8)?.max(0) as u32,
        locked_until: parse_ts(row.get(9)?),
    })
}

impl UserStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, StorageError> {
        let now = Utc::now();
        let id = {
            let conn = self.db.conn()?;
            conn.execute(
                "INSERT INTO users (username, email, password_hash, role, is_active, created_at, failed_login_attempts)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, 0)",
                params![username, email, password_hash, role.as_str(), now.to_rfc3339()],
            )?;
            conn.last_insert_rowid()
        };
        Ok(User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            created_at: now,
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
        })
    }

    fn find_one(&self, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<User>, StorageError> {
        let conn = self.db.conn()?;
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, clause);
        Ok(conn.query_row(&sql, [value], row_to_user).optional()?)
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<User>, StorageError> {
        self.find_one("id", &id)
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        self.find_one("username", &username)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        self.find_one("email", &email)
    }

    /// Persist the mutable fields of an existing user
    pub fn save(&self, user: &User) -> Result<(), StorageError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE users SET email = ?2, password_hash = ?3, role = ?4, is_active = ?5,
                    last_login = ?6, failed_login_attempts = ?7, locked_until = ?8
             WHERE id = ?1",
            params![
                user.id,
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.is_active as i64,
                user.last_login.map(|d| d.to_rfc3339()),
                user.failed_login_attempts as i64,
                user.locked_until.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// All users, newest first
    pub fn list(&self) -> Result<Vec<User>, StorageError> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.db.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// Create the `admin` account unless it already exists
    pub fn ensure_default_admin(&self, password: &str, rounds: u32) -> Result<bool, StorageError> {
        if self.find_by_username(DEFAULT_ADMIN_USERNAME)?.is_some() {
            return Ok(false);
        }
        self.create(
            DEFAULT_ADMIN_USERNAME,
            DEFAULT_ADMIN_EMAIL,
            &hash_password(password, rounds),
            Role::Admin,
        )?;
        info!("👤 Default admin account created");
        Ok(true)
    }
}
