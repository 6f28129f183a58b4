//! Quote provider clients (Yahoo Finance, Alpha Vantage, IEX Cloud)

mod alpha_vantage;
mod iex_cloud;
mod yahoo;

pub use alpha_vantage::AlphaVantageClient;
pub use iex_cloud::IexCloudClient;
pub use yahoo::YahooClient;

use super::StockApiError;
use crate::dataset::DataFrame;
use crate::types::Provider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

const USER_AGENT: &str = concat!("boursa/", env!("CARGO_PKG_VERSION"));

/// One provider call, with the API key already resolved
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Validated, uppercased symbol
    pub symbol: String,
    pub interval: Option<String>,
    pub api_key: Option<String>,
}

/// Trait for quote provider clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Raw provider table; column names are normalized by the caller
    async fn fetch(&self, request: &FetchRequest) -> Result<DataFrame, StockApiError>;
}

/// Shared HTTP client for the provider calls
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

pub(crate) fn network_error(provider: Provider, e: reqwest::Error) -> StockApiError {
    if e.is_timeout() {
        StockApiError::Network(format!("Timeout calling {}", provider.display_name()))
    } else {
        StockApiError::Network(format!("{} network error: {}", provider.display_name(), e))
    }
}
