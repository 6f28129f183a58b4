//! Configuration types and re-exports

pub use super::{
    AppConfig, AuthConfig, CacheConfig, LoggingConfig, Profile, SecurityConfig, ServerConfig,
    StockApiConfig, StorageConfig, UploadConfig,
};
