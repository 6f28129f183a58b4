//! Accounts, roles and login
//!
//! Users authenticate with a username and password. Repeated failures lock
//! the account for a configurable duration. Roles map to a fixed set of
//! permissions that the HTTP layer checks per route.

mod password;
mod store;
mod user;

pub use password::{hash_password, verify_password};
pub use store::{UserStore, DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_USERNAME};
pub use user::{PublicUser, User};

use crate::storage::StorageError;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Admin => &[
                View,
                Upload,
                Analyze,
                Predict,
                Export,
                ManageUsers,
                ManageConfig,
                ViewLogs,
            ],
            Role::User => &[View, Upload, Analyze, Predict, Export],
            Role::Viewer => &[View],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
    Upload,
    Analyze,
    Predict,
    Export,
    ManageUsers,
    ManageConfig,
    ViewLogs,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Please fill in all fields.")]
    MissingCredentials,
    #[error("Incorrect username or password.")]
    InvalidCredentials,
    #[error("Account locked. Please try again later.")]
    Locked,
    #[error("This account is disabled.")]
    Inactive,
    #[error("Public registration is disabled.")]
    RegistrationDisabled,
    #[error("{}", .0.join(" "))]
    Validation(Vec<String>),
    #[error("Authentication required.")]
    Unauthenticated,
    #[error("You do not have permission to access this resource.")]
    Forbidden,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lockout_minutes: i64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout: Duration::minutes(lockout_minutes.max(0)),
        }
    }
}

/// Check credentials and update the lockout counters
pub fn authenticate(
    store: &UserStore,
    username: &str,
    password: &str,
    policy: LockoutPolicy,
) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let Some(mut user) = store.find_by_username(username)? else {
        warn!("Login attempt for unknown user '{}'", username);
        return Err(AuthError::InvalidCredentials);
    };

    let now = Utc::now();
    let lock_was_set = user.locked_until.is_some();
    if user.is_locked(now) {
        warn!("🔒 Login refused, account '{}' is locked", username);
        return Err(AuthError::Locked);
    }
    if lock_was_set {
        store.save(&user)?;
    }

    if !user.is_active {
        return Err(AuthError::Inactive);
    }

    if !user.check_password(password) {
        user.record_failed_login(now, policy.max_attempts, policy.lockout);
        store.save(&user)?;
        if user.locked_until.is_some() {
            warn!(
                "🔒 Account '{}' locked after {} failed attempts",
                username, user.failed_login_attempts
            );
        }
        return Err(AuthError::InvalidCredentials);
    }

    user.record_login(now);
    store.save(&user)?;
    info!("✅ User '{}' logged in", username);
    Ok(user)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// Validate and create a regular user account
pub fn register(store: &UserStore, reg: &Registration, rounds: u32) -> Result<User, AuthError> {
    let username = reg.username.trim();
    let email = reg.email.trim().to_lowercase();
    let mut errors = Vec::new();

    if username.chars().count() < 3 {
        errors.push("Username must be at least 3 characters.".to_string());
    } else if store.find_by_username(username)?.is_some() {
        errors.push("This username is already taken.".to_string());
    }

    if !email.contains('@') {
        errors.push("Invalid email address.".to_string());
    } else if store.find_by_email(&email)?.is_some() {
        errors.push("This email is already in use.".to_string());
    }

    if reg.password.chars().count() < 8 {
        errors.push("Password must be at least 8 characters.".to_string());
    } else if reg.password != reg.confirm_password {
        errors.push("Passwords do not match.".to_string());
    }

    if !errors.is_empty() {
        return Err(AuthError::Validation(errors));
    }

    let user = store.create(
        username,
        &email,
        &hash_password(&reg.password, rounds),
        Role::User,
    )?;
    info!("👤 New account registered: {}", username);
    Ok(user)
}
