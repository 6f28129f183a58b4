//! IEX Cloud chart endpoint (JSON)

use super::{network_error, FetchRequest, QuoteProvider};
use crate::dataset::DataFrame;
use crate::stock::StockApiError;
use crate::types::Provider;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

const INTRADAY: &[&str] = &["1m", "5m", "15m", "30m", "1h"];

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(sk|pk)-[a-zA-Z0-9]+$").expect("key pattern is valid"));

/// Chart range path segment for an interval
pub fn chart_range(interval: Option<&str>) -> &'static str {
    match interval.unwrap_or("1d") {
        i if INTRADAY.contains(&i) => "1d",
        "1d" => "1m",
        "1w" => "3m",
        _ => "1y",
    }
}

pub struct IexCloudClient {
    client: reqwest::Client,
    base_url: String,
}

fn cell(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl IexCloudClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// JSON list of bar objects to a table. Intraday bars carry the time
    /// in a separate `minute` field, merged into `date`.
    fn to_frame(records: Vec<Map<String, Value>>) -> Result<DataFrame, StockApiError> {
        if records.is_empty() {
            return Err(StockApiError::Provider("No data returned by IEX Cloud".into()));
        }
        let mut headers: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if key != "minute" && !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                headers
                    .iter()
                    .map(|h| {
                        let value = record.get(h).and_then(cell);
                        match (h.as_str(), value, record.get("minute").and_then(cell)) {
                            ("date", Some(d), Some(m)) => Some(format!("{} {}", d, m)),
                            (_, v, _) => v,
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(DataFrame::from_rows(headers, rows))
    }
}

#[async_trait]
impl QuoteProvider for IexCloudClient {
    fn provider(&self) -> Provider {
        Provider::IexCloud
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<DataFrame, StockApiError> {
        let key = request.api_key.as_deref().ok_or_else(|| {
            StockApiError::InvalidApiKey(
                "IEX Cloud API key missing (api_key or IEX_CLOUD_API_KEY)".into(),
            )
        })?;
        if !KEY_PATTERN.is_match(key) {
            return Err(StockApiError::InvalidApiKey(
                "Invalid IEX Cloud API key format (expected sk-xxx or pk-xxx)".into(),
            ));
        }

        let range = chart_range(request.interval.as_deref());
        let url = format!("{}/stable/stock/{}/chart/{}", self.base_url, request.symbol, range);
        debug!(symbol = %request.symbol, range, "Fetching IEX Cloud chart");

        let resp = self
            .client
            .get(&url)
            .query(&[("token", key)])
            .send()
            .await
            .map_err(|e| network_error(Provider::IexCloud, e))?;

        match resp.status().as_u16() {
            200 => {}
            401 => {
                return Err(StockApiError::InvalidApiKey(
                    "IEX Cloud API key invalid or expired".into(),
                ))
            }
            402 => {
                return Err(StockApiError::RateLimitExceeded(
                    "IEX Cloud quota exceeded, check your plan".into(),
                ))
            }
            code => {
                return Err(StockApiError::Provider(format!(
                    "HTTP error {} from IEX Cloud",
                    code
                )))
            }
        }

        let records: Vec<Map<String, Value>> = resp
            .json()
            .await
            .map_err(|e| StockApiError::Provider(format!("IEX Cloud JSON parsing error: {}", e)))?;
        Self::to_frame(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_range() {
        assert_eq!(chart_range(Some("5m")), "1d");
        assert_eq!(chart_range(None), "1m");
        assert_eq!(chart_range(Some("1w")), "3m");
        assert_eq!(chart_range(Some("1mo")), "1y");
        assert_eq!(chart_range(Some("5y")), "1y");
    }

    #[test]
    fn test_key_format() {
        assert!(KEY_PATTERN.is_match("pk-abc123"));
        assert!(KEY_PATTERN.is_match("sk-XYZ"));
        assert!(!KEY_PATTERN.is_match("abc123"));
        assert!(!KEY_PATTERN.is_match("pk-abc_123"));
    }

    #[test]
    fn test_records_to_frame() {
        let records: Vec<Map<String, Value>> = serde_json::from_str(
            r#"[{"date":"2024-01-02","minute":"09:30","open":10.0,"close":10.5,"volume":100},
                {"date":"2024-01-02","minute":"09:31","open":10.5,"close":null,"volume":120}]"#,
        )
        .unwrap();
        let frame = IexCloudClient::to_frame(records).unwrap();
        let mut names = frame.column_names();
        names.sort();
        assert_eq!(names, vec!["close", "date", "open", "volume"]);
        assert_eq!(
            frame.column("date").unwrap().values[0].as_deref(),
            Some("2024-01-02 09:30")
        );
        assert_eq!(frame.column("close").unwrap().values[1], None);
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert!(IexCloudClient::to_frame(Vec::new()).is_err());
    }
}
