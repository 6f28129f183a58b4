//! Stock quote service
//!
//! One entry point over several market-data providers. Each fetch goes
//! through symbol validation, the shared cache, the provider quota and
//! finally the provider itself; results are normalized to OHLCV bars.

mod normalize;
mod rate_limit;
pub mod sources;

pub use normalize::normalize_columns;
pub use rate_limit::{allow_in_window, RateLimiter};
pub use sources::{FetchRequest, QuoteProvider};

use crate::cache::{get_json, set_json, Cache};
use crate::config::StockApiConfig;
use crate::types::{PriceBar, Provider};
use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use sources::{http_client, AlphaVantageClient, IexCloudClient, YahooClient};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const MAX_SYMBOL_LEN: usize = 20;
static SYMBOL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9.\-]+$").expect("symbol pattern is valid"));

#[derive(Debug, Clone, Error)]
pub enum StockApiError {
    #[error("{0}")]
    RateLimitExceeded(String),
    #[error("Invalid symbol (expected letters, digits, dashes or dots)")]
    InvalidSymbol,
    #[error("{0}")]
    InvalidApiKey(String),
    #[error("Unsupported API: {0}")]
    UnsupportedApi(String),
    #[error("{0}")]
    UnsupportedInterval(String),
    #[error("{0}")]
    Provider(String),
    #[error("{0}")]
    Network(String),
}

impl StockApiError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StockApiError::RateLimitExceeded(_))
    }
}

/// Published quota of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiQuota {
    pub requests_per_minute: u32,
    pub requests_per_day: Option<u32>,
    /// Cache lifetime of a fetched series, in seconds
    pub cache_timeout: u64,
}

pub fn quota(provider: Provider) -> ApiQuota {
    match provider {
        Provider::Yahoo => ApiQuota {
            requests_per_minute: 2000,
            requests_per_day: None,
            cache_timeout: 300,
        },
        Provider::AlphaVantage => ApiQuota {
            requests_per_minute: 5,
            requests_per_day: Some(500),
            cache_timeout: 3600,
        },
        Provider::IexCloud => ApiQuota {
            requests_per_minute: 100,
            requests_per_day: Some(50_000),
            cache_timeout: 300,
        },
    }
}

/// Entry of the provider listing
#[derive(Debug, Clone, Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub requires_key: bool,
    pub has_key: bool,
    pub quotas: ApiQuota,
}

/// Trimmed, uppercased symbol when it is well-formed
pub fn validate_symbol(symbol: &str) -> Option<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || symbol.chars().count() > MAX_SYMBOL_LEN {
        return None;
    }
    SYMBOL_PATTERN.is_match(&symbol).then_some(symbol)
}

/// `stock_api:{api}:{SYMBOL}:{interval|default}:{k=v_...}`
pub fn cache_key(api: &str, symbol: &str, interval: Option<&str>, params: &[(&str, &str)]) -> String {
    let mut params: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    params.sort();
    let params = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("_");
    format!(
        "stock_api:{}:{}:{}:{}",
        api,
        symbol.to_uppercase(),
        interval.filter(|i| !i.is_empty()).unwrap_or("default"),
        params
    )
}

pub struct StockApiService {
    providers: HashMap<Provider, Arc<dyn QuoteProvider>>,
    cache: Arc<dyn Cache>,
    limiter: RateLimiter,
    alphavantage_key: Option<String>,
    iex_cloud_key: Option<String>,
    cache_secs: HashMap<Provider, u64>,
}

impl StockApiService {
    /// Service with the HTTP provider clients from `config`
    pub fn new(config: &StockApiConfig, cache: Arc<dyn Cache>) -> Result<Self> {
        let client = http_client(config.request_timeout_secs)?;
        let providers: Vec<Arc<dyn QuoteProvider>> = vec![
            Arc::new(YahooClient::new(client.clone(), &config.yahoo_base_url)),
            Arc::new(AlphaVantageClient::new(client.clone(), &config.alpha_vantage_base_url)),
            Arc::new(IexCloudClient::new(client, &config.iex_base_url)),
        ];
        Ok(Self::with_providers(config, cache, providers))
    }

    pub fn with_providers(
        config: &StockApiConfig,
        cache: Arc<dyn Cache>,
        providers: Vec<Arc<dyn QuoteProvider>>,
    ) -> Self {
        let non_empty = |k: &Option<String>| k.clone().filter(|v| !v.trim().is_empty());
        Self {
            providers: providers.into_iter().map(|p| (p.provider(), p)).collect(),
            cache,
            limiter: RateLimiter::new(),
            alphavantage_key: non_empty(&config.alphavantage_key),
            iex_cloud_key: non_empty(&config.iex_cloud_key),
            cache_secs: HashMap::from([
                (Provider::Yahoo, config.yahoo_cache_secs),
                (Provider::AlphaVantage, config.alpha_vantage_cache_secs),
                (Provider::IexCloud, config.iex_cloud_cache_secs),
            ]),
        }
    }

    fn configured_key(&self, provider: Provider) -> Option<&String> {
        match provider {
            Provider::Yahoo => None,
            Provider::AlphaVantage => self.alphavantage_key.as_ref(),
            Provider::IexCloud => self.iex_cloud_key.as_ref(),
        }
    }

    fn quota_for(&self, provider: Provider) -> ApiQuota {
        let mut q = quota(provider);
        if let Some(secs) = self.cache_secs.get(&provider) {
            q.cache_timeout = *secs;
        }
        q
    }

    /// Providers with key presence and quotas
    pub fn get_available_apis(&self) -> BTreeMap<String, ApiInfo> {
        Provider::ALL
            .iter()
            .map(|p| {
                let info = ApiInfo {
                    name: p.display_name().to_string(),
                    requires_key: p.requires_key(),
                    has_key: !p.requires_key() || self.configured_key(*p).is_some(),
                    quotas: self.quota_for(*p),
                };
                (p.as_str().to_string(), info)
            })
            .collect()
    }

    /// Fetch normalized bars. Cache hits do not count against the quota.
    pub async fn fetch_stock_data(
        &self,
        api: &str,
        symbol: &str,
        interval: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Vec<PriceBar>, StockApiError> {
        let symbol = validate_symbol(symbol).ok_or(StockApiError::InvalidSymbol)?;
        let api = api.trim().to_lowercase();
        let provider = Provider::from_str(&api)
            .ok_or_else(|| StockApiError::UnsupportedApi(api.clone()))?;
        let interval = interval.map(str::trim).filter(|i| !i.is_empty());

        let key = cache_key(provider.as_str(), &symbol, interval, &[]);
        if let Some(bars) = get_json::<Vec<PriceBar>>(self.cache.as_ref(), &key).await {
            debug!("Data served from cache: {}", key);
            return Ok(bars);
        }

        if let Err(e) = self.limiter.check(provider, "global") {
            warn!("{}", e);
            return Err(e);
        }

        let client = self
            .providers
            .get(&provider)
            .ok_or_else(|| StockApiError::UnsupportedApi(api.clone()))?;
        let request = FetchRequest {
            symbol: symbol.clone(),
            interval: interval.map(str::to_string),
            api_key: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .or_else(|| self.configured_key(provider).cloned()),
        };

        let frame = client.fetch(&request).await.map_err(|e| {
            error!("API call to {} failed for {}: {}", provider, symbol, e);
            e
        })?;

        let bars = normalize_columns(&frame);
        if bars.is_empty() {
            return Err(StockApiError::Provider(format!(
                "No data found for symbol {}",
                symbol
            )));
        }

        let ttl = self.quota_for(provider).cache_timeout;
        set_json(self.cache.as_ref(), &key, &bars, Duration::from_secs(ttl)).await;
        debug!("Data cached: {} (timeout: {}s)", key, ttl);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{AppConfig, Profile};
    use crate::dataset::DataFrame;
    use sources::MockQuoteProvider;

    fn stock_config() -> StockApiConfig {
        let root = std::env::temp_dir();
        AppConfig::for_profile(Profile::Testing, &root).unwrap().stock_api
    }

    fn sample_frame() -> DataFrame {
        DataFrame::from_rows(
            vec!["Date".into(), "Close".into()],
            vec![
                vec![Some("2024-01-03".into()), Some("11".into())],
                vec![Some("2024-01-02".into()), Some("10".into())],
            ],
        )
    }

    fn mock(provider: Provider, times: usize) -> MockQuoteProvider {
        let mut m = MockQuoteProvider::new();
        m.expect_provider().return_const(provider);
        m.expect_fetch().times(times).returning(|_| Ok(sample_frame()));
        m
    }

    #[test]
    fn test_validate_symbol() {
        assert_eq!(validate_symbol(" aapl ").as_deref(), Some("AAPL"));
        assert_eq!(validate_symbol("btc-usd").as_deref(), Some("BTC-USD"));
        assert_eq!(validate_symbol("BRK.B").as_deref(), Some("BRK.B"));
        assert!(validate_symbol("").is_none());
        assert!(validate_symbol("AA PL").is_none());
        assert!(validate_symbol(&"A".repeat(21)).is_none());
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("yahoo", "aapl", None, &[]), "stock_api:yahoo:AAPL:default:");
        assert_eq!(
            cache_key("yahoo", "AAPL", Some("1d"), &[("range", "1y"), ("adj", ""), ("a", "b")]),
            "stock_api:yahoo:AAPL:1d:a=b_range=1y"
        );
    }

    #[tokio::test]
    async fn test_fetch_normalizes_and_caches() {
        let cache = Arc::new(MemoryCache::new(100));
        let service = StockApiService::with_providers(
            &stock_config(),
            cache,
            vec![Arc::new(mock(Provider::Yahoo, 1))],
        );
        let bars = service
            .fetch_stock_data("yahoo", "aapl", Some("1d"), None)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].date < bars[1].date);

        // Second call is a cache hit; the mock allows one fetch only
        let again = service
            .fetch_stock_data("Yahoo", "AAPL", Some("1d"), None)
            .await
            .unwrap();
        assert_eq!(again, bars);
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_input() {
        let service = StockApiService::with_providers(
            &stock_config(),
            Arc::new(MemoryCache::new(10)),
            vec![Arc::new(mock(Provider::Yahoo, 0))],
        );
        assert!(matches!(
            service.fetch_stock_data("yahoo", "bad symbol!", None, None).await,
            Err(StockApiError::InvalidSymbol)
        ));
        assert!(matches!(
            service.fetch_stock_data("bloomberg", "AAPL", None, None).await,
            Err(StockApiError::UnsupportedApi(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_misses() {
        let mut m = MockQuoteProvider::new();
        m.expect_provider().return_const(Provider::AlphaVantage);
        m.expect_fetch().times(5).returning(|_| Ok(sample_frame()));
        let service = StockApiService::with_providers(
            &stock_config(),
            Arc::new(MemoryCache::new(100)),
            vec![Arc::new(m)],
        );
        for sym in ["A", "B", "C", "D", "E"] {
            service
                .fetch_stock_data("alpha_vantage", sym, None, Some("demo"))
                .await
                .unwrap();
        }
        let err = service
            .fetch_stock_data("alpha_vantage", "F", None, Some("demo"))
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn test_api_key_resolution() {
        let mut config = stock_config();
        config.alphavantage_key = Some("ENVKEY".into());
        let mut m = MockQuoteProvider::new();
        m.expect_provider().return_const(Provider::AlphaVantage);
        m.expect_fetch()
            .withf(|req: &FetchRequest| req.api_key.as_deref() == Some("ENVKEY"))
            .times(1)
            .returning(|_| Ok(sample_frame()));
        let service = StockApiService::with_providers(
            &config,
            Arc::new(MemoryCache::new(10)),
            vec![Arc::new(m)],
        );
        service
            .fetch_stock_data("alpha_vantage", "IBM", None, Some("  "))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_provider_result_is_an_error() {
        let mut m = MockQuoteProvider::new();
        m.expect_provider().return_const(Provider::Yahoo);
        m.expect_fetch().returning(|_| Ok(DataFrame::default()));
        let service = StockApiService::with_providers(
            &stock_config(),
            Arc::new(MemoryCache::new(10)),
            vec![Arc::new(m)],
        );
        let err = service
            .fetch_stock_data("yahoo", "ZZZZ", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No data found for symbol ZZZZ");
    }

    #[test]
    fn test_available_apis() {
        let mut config = stock_config();
        config.alphavantage_key = None;
        config.iex_cloud_key = Some("pk-abc".into());
        let service = StockApiService::with_providers(&config, Arc::new(MemoryCache::new(10)), vec![]);
        let apis = service.get_available_apis();
        assert_eq!(apis.len(), 3);
        assert!(apis["yahoo"].has_key && !apis["yahoo"].requires_key);
        assert!(!apis["alpha_vantage"].has_key);
        assert!(apis["iex_cloud"].has_key);
        assert_eq!(apis["alpha_vantage"].quotas.requests_per_day, Some(500));
        assert_eq!(apis["alpha_vantage"].quotas.cache_timeout, 3600);
    }
}
