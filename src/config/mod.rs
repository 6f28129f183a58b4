//! Configuration management for Boursa
//!
//! Layered load: profile defaults, `config/*.{yaml,toml}` files, `BOURSA__*`
//! environment variables, then the flat variables used by existing
//! deployments (`SECRET_KEY`, `CACHE_REDIS_URL`, `ALPHAVANTAGE_KEY`, ...).

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hard ceiling for request bodies, whatever the configuration says.
pub const MAX_UPLOAD_CEILING: i64 = 50 * 1024 * 1024;

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    Production,
    Testing,
}

impl Profile {
    /// Resolve from `APP_CONFIG`, then `FLASK_ENV`; production when unset or unknown.
    pub fn from_env() -> Self {
        std::env::var("APP_CONFIG")
            .ok()
            .or_else(|| std::env::var("FLASK_ENV").ok())
            .and_then(|v| Self::parse(&v))
            .unwrap_or(Profile::Production)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Profile::Development),
            "production" | "prod" | "default" => Some(Profile::Production),
            "testing" | "test" => Some(Profile::Testing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
            Profile::Testing => "testing",
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub profile: Profile,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub auth: AuthConfig,
    pub upload: UploadConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub stock_api: StockApiConfig,
    pub logging: LoggingConfig,
    /// Notes produced while loading, logged once tracing is up
    #[serde(skip)]
    pub load_warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Listen port (`PORT` on PaaS hosts)
    pub port: u16,
    /// Directory served under /static
    pub static_dir: String,
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Session signing key; mandatory in production
    pub secret_key: Option<String>,
    /// Cookie name carrying the session id
    pub session_cookie_name: String,
    /// Inactivity lifetime of a session in seconds
    pub session_lifetime_secs: u64,
    /// Send the cookie over HTTPS only
    pub session_cookie_secure: bool,
    /// PBKDF2 rounds for new password hashes
    pub password_hash_iterations: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Failed attempts before the account is locked
    pub max_login_attempts: u32,
    /// Lock duration in minutes
    pub lockout_minutes: i64,
    pub disable_public_registration: bool,
    /// Guard every feature route with its permission
    pub require_login: bool,
    /// Password of the seeded `admin` account; no seeding when unset
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Destination directory for uploaded and fetched datasets
    pub dir: String,
    /// Request body cap in bytes
    pub max_content_length: usize,
    /// Lowercase extensions accepted for datasets
    pub allowed_extensions: Vec<String>,
    /// Scan uploads with clamd when reachable
    pub clamav_enabled: bool,
    pub clamav_host: String,
    pub clamav_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// "simple" or "redis"; resolved at load time
    pub cache_type: Option<String>,
    /// Default entry lifetime in seconds
    pub default_timeout_secs: u64,
    /// Max entries held by the in-memory cache
    pub threshold: usize,
    pub redis_url: Option<String>,
    pub redis_host: Option<String>,
    pub redis_port: u16,
    pub redis_db: i64,
    pub redis_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding users and map locations
    pub database_path: String,
    /// Directory of forecast model artifacts
    pub models_dir: String,
    /// Directory of background job files
    pub jobs_dir: String,
    /// Seed demo locations when the table is empty
    pub seed_demo_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockApiConfig {
    pub alphavantage_key: Option<String>,
    pub iex_cloud_key: Option<String>,
    pub yahoo_base_url: String,
    pub alpha_vantage_base_url: String,
    pub iex_base_url: String,
    /// Provider request timeout in seconds
    pub request_timeout_secs: u64,
    /// Cache lifetime per provider, in seconds
    pub yahoo_cache_secs: u64,
    pub alpha_vantage_cache_secs: u64,
    pub iex_cloud_cache_secs: u64,
    /// Per-session fetch limit on /upload/api_fetch
    pub fetch_limit: usize,
    pub fetch_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level name (Python names such as WARNING are accepted)
    pub level: String,
    /// Optional rotating log file
    pub file: Option<String>,
    /// Emit JSON lines instead of text
    pub json: bool,
    pub max_file_bytes: u64,
    pub backup_count: usize,
}

impl CacheConfig {
    /// Redis URL from `redis_url`, or assembled from host/port/db/password.
    pub fn resolved_redis_url(&self) -> Option<String> {
        if let Some(url) = self.redis_url.as_ref().filter(|u| !u.is_empty()) {
            return Some(url.clone());
        }
        let host = self.redis_host.as_ref().filter(|h| !h.is_empty())?;
        Some(match self.redis_password.as_ref().filter(|p| !p.is_empty()) {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, host, self.redis_port, self.redis_db),
            None => format!("redis://{}:{}/{}", host, self.redis_port, self.redis_db),
        })
    }

    pub fn is_redis(&self) -> bool {
        self.cache_type.as_deref() == Some("redis")
    }
}

impl UploadConfig {
    /// True when the file name carries an accepted extension
    pub fn allowed_file(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            }
            None => false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let profile = Profile::from_env();
        let builder = Self::defaults(profile)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", profile.as_str())).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (BOURSA__SECTION__KEY)
            .add_source(
                Environment::with_prefix("BOURSA")
                    .separator("__")
                    .try_parsing(true),
            );
        let builder = legacy_env_overrides(builder)?;

        let app_config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.finalize()
    }

    /// Defaults of `profile` only, with every path rooted at `root`
    pub fn for_profile(profile: Profile, root: &Path) -> Result<Self> {
        let path = |p: &str| root.join(p).to_string_lossy().into_owned();
        let app_config: AppConfig = Self::defaults(profile)?
            .set_override("upload.dir", path("uploads"))?
            .set_override("storage.database_path", path("user_locations.db"))?
            .set_override("storage.models_dir", path("models"))?
            .set_override("storage.jobs_dir", path("logs/jobs"))?
            .set_override("server.static_dir", path("static"))?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.finalize()
    }

    fn defaults(profile: Profile) -> Result<ConfigBuilder<DefaultState>> {
        let production = profile == Profile::Production;
        let development = profile == Profile::Development;
        let testing = profile == Profile::Testing;

        let builder = Config::builder()
            .set_default("profile", profile.as_str())?
            // Server defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("server.static_dir", "static")?
            .set_default("server.debug", development)?
            // Security defaults
            .set_default("security.session_cookie_name", "boursa_session")?
            .set_default("security.session_lifetime_secs", 86400)?
            .set_default("security.session_cookie_secure", production)?
            .set_default(
                "security.password_hash_iterations",
                if testing { 1_000 } else { 600_000 },
            )?
            // Auth defaults
            .set_default("auth.max_login_attempts", 5)?
            .set_default("auth.lockout_minutes", 30)?
            .set_default("auth.disable_public_registration", false)?
            .set_default("auth.require_login", false)?
            // Upload defaults
            .set_default("upload.dir", "uploads")?
            .set_default("upload.max_content_length", 16 * 1024 * 1024)?
            .set_default("upload.allowed_extensions", vec!["csv", "xlsx", "xls"])?
            .set_default("upload.clamav_enabled", false)?
            .set_default("upload.clamav_host", "127.0.0.1")?
            .set_default("upload.clamav_port", 3310)?
            // Cache defaults
            .set_default(
                "cache.default_timeout_secs",
                if production { 600 } else { 300 },
            )?
            .set_default("cache.threshold", 1000)?
            .set_default("cache.redis_port", 6379)?
            .set_default("cache.redis_db", 0)?
            // Storage defaults
            .set_default("storage.database_path", "user_locations.db")?
            .set_default("storage.models_dir", "models")?
            .set_default("storage.jobs_dir", "logs/jobs")?
            .set_default("storage.seed_demo_data", development)?
            // Stock API defaults
            .set_default("stock_api.yahoo_base_url", "https://query1.finance.yahoo.com")?
            .set_default("stock_api.alpha_vantage_base_url", "https://www.alphavantage.co")?
            .set_default("stock_api.iex_base_url", "https://cloud.iexapis.com")?
            .set_default("stock_api.request_timeout_secs", 30)?
            .set_default("stock_api.yahoo_cache_secs", 300)?
            .set_default("stock_api.alpha_vantage_cache_secs", 3600)?
            .set_default("stock_api.iex_cloud_cache_secs", 300)?
            .set_default("stock_api.fetch_limit", 10)?
            .set_default("stock_api.fetch_window_secs", 60)?
            // Logging defaults
            .set_default("logging.level", if production { "WARNING" } else { "INFO" })?
            .set_default("logging.json", false)?
            .set_default("logging.max_file_bytes", 10 * 1024 * 1024)?
            .set_default("logging.backup_count", 5)?;

        let builder = match profile {
            Profile::Production => builder.set_default("logging.file", "logs/app.log")?,
            Profile::Development => builder
                .set_default("security.secret_key", "dev-secret-key-change-in-production")?
                .set_default("auth.admin_password", "admin123")?,
            Profile::Testing => builder
                .set_default("security.secret_key", "test-secret-key")?
                .set_default("auth.admin_password", "admin123")?
                .set_default("cache.cache_type", "simple")?,
        };

        Ok(builder)
    }

    /// Resolve derived settings and enforce profile requirements
    fn finalize(mut self) -> Result<Self> {
        if self.profile == Profile::Production
            && self.security.secret_key.as_deref().map_or(true, str::is_empty)
        {
            bail!("SECRET_KEY must be set in production");
        }

        if self.upload.max_content_length as i64 > MAX_UPLOAD_CEILING {
            self.load_warnings.push(format!(
                "max_content_length {} exceeds 50MB, clamped",
                self.upload.max_content_length
            ));
            self.upload.max_content_length = MAX_UPLOAD_CEILING as usize;
        }

        let requested = self
            .cache
            .cache_type
            .as_deref()
            .map(normalize_cache_type)
            .transpose()?;
        let has_redis = self.cache.resolved_redis_url().is_some();
        let resolved = match requested {
            Some("redis") if !has_redis => {
                self.load_warnings
                    .push("Redis cache requested without CACHE_REDIS_URL or host, using in-memory cache".into());
                "simple"
            }
            Some(kind) => kind,
            None if has_redis => "redis",
            None => {
                if self.profile == Profile::Production {
                    self.load_warnings.push(
                        "No Redis configured for production, using in-memory cache (not shared between workers)"
                            .into(),
                    );
                }
                "simple"
            }
        };
        self.cache.cache_type = Some(resolved.to_string());

        self.upload.allowed_extensions = self
            .upload
            .allowed_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();

        Ok(self)
    }

    /// Secret key, with an empty string never accepted
    pub fn secret_key(&self) -> &str {
        self.security.secret_key.as_deref().unwrap_or_default()
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "profile={} cache={} upload_dir={} max_upload={}MB registration={} require_login={} alpha_vantage_key={} iex_key={}",
            self.profile.as_str(),
            self.cache.cache_type.as_deref().unwrap_or("simple"),
            self.upload.dir,
            self.upload.max_content_length / (1024 * 1024),
            if self.auth.disable_public_registration { "closed" } else { "open" },
            self.auth.require_login,
            self.stock_api.alphavantage_key.is_some(),
            self.stock_api.iex_cloud_key.is_some(),
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

fn normalize_cache_type(raw: &str) -> Result<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "redis" | "rediscache" => Ok("redis"),
        "simple" | "simplecache" | "memory" | "null" | "nullcache" => Ok("simple"),
        other => bail!("Unknown cache type: {}", other),
    }
}

fn env_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn env_int(name: &str) -> Result<Option<i64>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<i64>()
            .map(Some)
            .with_context(|| format!("{} must be an integer, got {:?}", name, v)),
        Err(_) => Ok(None),
    }
}

/// Flat variables predating the `BOURSA__` namespace take precedence.
fn legacy_env_overrides(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

    let builder = builder
        .set_override_option("security.secret_key", var("SECRET_KEY"))?
        .set_override_option("cache.cache_type", var("CACHE_TYPE"))?
        .set_override_option("cache.redis_url", var("CACHE_REDIS_URL"))?
        .set_override_option("cache.redis_host", var("CACHE_REDIS_HOST"))?
        .set_override_option("cache.redis_password", var("CACHE_REDIS_PASSWORD"))?
        .set_override_option("cache.redis_port", env_int("CACHE_REDIS_PORT")?)?
        .set_override_option("cache.redis_db", env_int("CACHE_REDIS_DB")?)?
        .set_override_option("cache.default_timeout_secs", env_int("CACHE_DEFAULT_TIMEOUT")?)?
        .set_override_option("auth.max_login_attempts", env_int("MAX_LOGIN_ATTEMPTS")?)?
        .set_override_option("auth.lockout_minutes", env_int("ACCOUNT_LOCKOUT_DURATION")?)?
        .set_override_option(
            "auth.disable_public_registration",
            var("DISABLE_PUBLIC_REGISTRATION").map(|v| env_flag(&v)),
        )?
        .set_override_option("auth.admin_password", var("ADMIN_PASSWORD"))?
        .set_override_option("stock_api.alphavantage_key", var("ALPHAVANTAGE_KEY"))?
        .set_override_option("stock_api.iex_cloud_key", var("IEX_CLOUD_API_KEY"))?
        .set_override_option("upload.max_content_length", env_int("MAX_CONTENT_LENGTH")?)?
        .set_override_option("logging.level", var("LOG_LEVEL"))?
        .set_override_option("logging.file", var("LOG_FILE"))?
        .set_override_option("server.port", env_int("PORT")?)?;

    Ok(builder)
}
