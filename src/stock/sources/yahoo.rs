//! Yahoo Finance chart endpoint

use super::{network_error, FetchRequest, QuoteProvider};
use crate::dataset::{Column, DataFrame};
use crate::stock::StockApiError;
use crate::types::Provider;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tracing::debug;

pub const INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];
const MINUTE_INTERVALS: &[&str] = &["1m", "2m", "5m", "15m", "30m", "60m", "90m"];

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooClient {
    client: reqwest::Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// History length requested for an interval
    pub fn range_for(interval: &str) -> &'static str {
        if MINUTE_INTERVALS.contains(&interval) {
            "7d"
        } else if interval == "1h" {
            "60d"
        } else {
            "1y"
        }
    }

    fn to_frame(symbol: &str, body: ChartResponse, intraday: bool) -> Result<DataFrame, StockApiError> {
        if let Some(err) = body.chart.error {
            return Err(StockApiError::Provider(format!(
                "Yahoo Finance error: {}",
                err.description.unwrap_or_else(|| "unknown".into())
            )));
        }
        let result = body
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .filter(|r| !r.timestamp.is_empty())
            .ok_or_else(|| StockApiError::Provider(format!("No data found for symbol {}", symbol)))?;

        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
        let fmt = if intraday { "%Y-%m-%d %H:%M:%S" } else { "%Y-%m-%d" };
        let dates = result
            .timestamp
            .iter()
            .map(|ts| DateTime::from_timestamp(*ts, 0).map(|d| d.naive_utc().format(fmt).to_string()))
            .collect();
        let n = result.timestamp.len();
        let series = |v: Vec<Option<f64>>| -> Vec<Option<String>> {
            (0..n)
                .map(|i| v.get(i).copied().flatten().map(|x| x.to_string()))
                .collect()
        };
        let date_name = if intraday { "Datetime" } else { "Date" };
        DataFrame::new(vec![
            Column::new(date_name, dates),
            Column::new("Open", series(quote.open)),
            Column::new("High", series(quote.high)),
            Column::new("Low", series(quote.low)),
            Column::new("Close", series(quote.close)),
            Column::new("Volume", series(quote.volume)),
        ])
        .map_err(|e| StockApiError::Provider(e.to_string()))
    }
}

#[async_trait]
impl QuoteProvider for YahooClient {
    fn provider(&self) -> Provider {
        Provider::Yahoo
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<DataFrame, StockApiError> {
        let interval = request.interval.as_deref().unwrap_or("1d");
        if !INTERVALS.contains(&interval) {
            return Err(StockApiError::UnsupportedInterval(format!(
                "Invalid Yahoo interval: {}",
                interval
            )));
        }
        let range = Self::range_for(interval);
        let url = format!("{}/v8/finance/chart/{}", self.base_url, request.symbol);
        debug!(symbol = %request.symbol, interval, range, "Fetching Yahoo chart");

        let resp = self
            .client
            .get(&url)
            .query(&[("interval", interval), ("range", range)])
            .send()
            .await
            .map_err(|e| network_error(Provider::Yahoo, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StockApiError::RateLimitExceeded(
                "Yahoo Finance rate limit reached".into(),
            ));
        }
        let body: ChartResponse = resp.json().await.map_err(|e| {
            if status.is_success() {
                StockApiError::Provider(format!("Yahoo Finance returned invalid JSON: {}", e))
            } else {
                StockApiError::Provider(format!("HTTP error {} from Yahoo Finance", status.as_u16()))
            }
        })?;

        let intraday = MINUTE_INTERVALS.contains(&interval) || interval == "1h";
        Self::to_frame(&request.symbol, body, intraday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_for_interval() {
        assert_eq!(YahooClient::range_for("5m"), "7d");
        assert_eq!(YahooClient::range_for("1h"), "60d");
        assert_eq!(YahooClient::range_for("1d"), "1y");
    }

    #[test]
    fn test_chart_json_to_frame() {
        let raw = r#"{"chart":{"result":[{"timestamp":[1704153600,1704240000],
            "indicators":{"quote":[{"open":[10.0,11.0],"high":[12.0,null],
            "low":[9.0,10.0],"close":[11.0,10.5],"volume":[1000,2000]}]}}],"error":null}}"#;
        let body: ChartResponse = serde_json::from_str(raw).unwrap();
        let frame = YahooClient::to_frame("AAPL", body, false).unwrap();
        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.column("Date").unwrap().values[0].as_deref(), Some("2024-01-02"));
        assert_eq!(frame.column("High").unwrap().values[1], None);
    }

    #[test]
    fn test_empty_result_is_an_error() {
        let raw = r#"{"chart":{"result":[],"error":null}}"#;
        let body: ChartResponse = serde_json::from_str(raw).unwrap();
        let err = YahooClient::to_frame("ZZZZ", body, false).unwrap_err();
        assert_eq!(err.to_string(), "No data found for symbol ZZZZ");
    }

    #[test]
    fn test_chart_error_is_reported() {
        let raw = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let body: ChartResponse = serde_json::from_str(raw).unwrap();
        assert!(YahooClient::to_frame("X", body, false)
            .unwrap_err()
            .to_string()
            .contains("delisted"));
    }
}
