//! User accounts and the login lockout counter

use super::{verify_password, Permission, Role};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// What clients get to see of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn check_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }

    /// Inactive accounts hold no permission
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_active && self.role.permissions().contains(&permission)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True while a lock is in force. An expired lock is cleared together
    /// with the failure counter; callers persist the user afterwards.
    pub fn is_locked(&mut self, now: DateTime<Utc>) -> bool {
        match self.locked_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.locked_until = None;
                self.failed_login_attempts = 0;
                false
            }
            None => false,
        }
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login = Some(now);
        self.failed_login_attempts = 0;
        self.locked_until = None;
    }

    /// Count a failure; lock once `max_attempts` is reached
    pub fn record_failed_login(&mut self, now: DateTime<Utc>, max_attempts: u32, lockout: Duration) {
        self.failed_login_attempts += 1;
        if self.failed_login_attempts >= max_attempts {
            self.locked_until = Some(now + lockout);
        }
    }

    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            is_active: self.is_active,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;

    fn user(role: Role) -> User {
        User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: hash_password("password123", 10),
            role,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
        }
    }

    #[test]
    fn test_permissions_by_role() {
        let admin = user(Role::Admin);
        assert!(admin.has_permission(Permission::ManageUsers));
        assert!(admin.has_permission(Permission::ViewLogs));

        let regular = user(Role::User);
        assert!(regular.has_permission(Permission::Predict));
        assert!(regular.has_permission(Permission::Export));
        assert!(!regular.has_permission(Permission::ManageConfig));

        let viewer = user(Role::Viewer);
        assert!(viewer.has_permission(Permission::View));
        assert!(!viewer.has_permission(Permission::Upload));
    }

    #[test]
    fn test_inactive_user_has_no_permission() {
        let mut admin = user(Role::Admin);
        admin.is_active = false;
        assert!(!admin.has_permission(Permission::View));
    }

    #[test]
    fn test_lockout_after_max_attempts() {
        let mut u = user(Role::User);
        let now = Utc::now();
        for _ in 0..4 {
            u.record_failed_login(now, 5, Duration::minutes(30));
        }
        assert!(!u.is_locked(now));
        u.record_failed_login(now, 5, Duration::minutes(30));
        assert!(u.is_locked(now + Duration::minutes(29)));
    }

    #[test]
    fn test_expired_lock_clears_itself() {
        let mut u = user(Role::User);
        let now = Utc::now();
        for _ in 0..5 {
            u.record_failed_login(now, 5, Duration::minutes(30));
        }
        assert!(!u.is_locked(now + Duration::minutes(31)));
        assert_eq!(u.failed_login_attempts, 0);
        assert!(u.locked_until.is_none());
    }

    #[test]
    fn test_record_login_resets_counters() {
        let mut u = user(Role::User);
        let now = Utc::now();
        u.record_failed_login(now, 5, Duration::minutes(30));
        u.record_login(now);
        assert_eq!(u.failed_login_attempts, 0);
        assert_eq!(u.last_login, Some(now));
    }

    #[test]
    fn test_public_view_has_no_hash() {
        let json = serde_json::to_value(user(Role::Viewer).to_public()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "viewer");
    }
}
