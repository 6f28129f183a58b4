//! Alpha Vantage time series (CSV)

use super::{network_error, FetchRequest, QuoteProvider};
use crate::dataset::{load_bytes, DataFrame};
use crate::stock::StockApiError;
use crate::types::Provider;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

const REQUIRED_COLUMNS: &[&str] = &["timestamp", "open", "high", "low", "close"];

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]+$").expect("key pattern is valid"));

/// `TIME_SERIES_*` function for an interval name
pub fn series_function(interval: Option<&str>) -> Result<&'static str, StockApiError> {
    match interval.unwrap_or("daily") {
        "daily" => Ok("TIME_SERIES_DAILY"),
        "weekly" => Ok("TIME_SERIES_WEEKLY"),
        "monthly" => Ok("TIME_SERIES_MONTHLY"),
        other => Err(StockApiError::UnsupportedInterval(format!(
            "Invalid Alpha Vantage interval: {}. Options: daily, weekly, monthly",
            other
        ))),
    }
}

pub struct AlphaVantageClient {
    client: reqwest::Client,
    base_url: String,
}

impl AlphaVantageClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Validate a response body and parse the CSV payload
    fn parse_body(text: &str) -> Result<DataFrame, StockApiError> {
        if text.contains("Thank you for using Alpha Vantage") && text.contains("API call frequency") {
            return Err(StockApiError::RateLimitExceeded(
                "Alpha Vantage call frequency limit reached".into(),
            ));
        }
        if text.contains("Error Message") || text.contains("Invalid API call") {
            return Err(StockApiError::Provider(
                "Error in the Alpha Vantage response".into(),
            ));
        }
        if text.len() < 50 {
            return Err(StockApiError::Provider(
                "Empty or invalid Alpha Vantage response".into(),
            ));
        }

        let frame = load_bytes("alpha_vantage.csv", text.as_bytes())
            .map_err(|e| StockApiError::Provider(format!("Alpha Vantage CSV error: {}", e)))?
            .frame;
        if frame.is_empty() {
            return Err(StockApiError::Provider(
                "No data returned by Alpha Vantage".into(),
            ));
        }

        let names: Vec<String> = frame.column_names().iter().map(|c| c.to_lowercase()).collect();
        if !REQUIRED_COLUMNS.iter().all(|req| names.iter().any(|n| n == req)) {
            return Err(StockApiError::Provider(
                "Invalid Alpha Vantage data format".into(),
            ));
        }
        Ok(frame)
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageClient {
    fn provider(&self) -> Provider {
        Provider::AlphaVantage
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<DataFrame, StockApiError> {
        let function = series_function(request.interval.as_deref())?;
        let key = request
            .api_key
            .as_deref()
            .ok_or_else(|| {
                StockApiError::InvalidApiKey(
                    "Alpha Vantage API key missing (api_key or ALPHAVANTAGE_KEY)".into(),
                )
            })?
            .to_uppercase();
        if !KEY_PATTERN.is_match(&key) {
            return Err(StockApiError::InvalidApiKey("Invalid API key format".into()));
        }

        debug!(symbol = %request.symbol, function, "Fetching Alpha Vantage series");
        let resp = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("function", function),
                ("symbol", request.symbol.as_str()),
                ("datatype", "csv"),
                ("outputsize", "compact"),
                ("apikey", key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| network_error(Provider::AlphaVantage, e))?;

        if !resp.status().is_success() {
            return Err(StockApiError::Provider(format!(
                "HTTP error {} from Alpha Vantage",
                resp.status().as_u16()
            )));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| network_error(Provider::AlphaVantage, e))?;
        Self::parse_body(&text)
    }
}
