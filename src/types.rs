//! Core types used throughout Boursa
//!
//! Quote providers, price bars and forecast step intervals.

use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported stock quote providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Yahoo,
    AlphaVantage,
    IexCloud,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Yahoo, Provider::AlphaVantage, Provider::IexCloud];

    /// Identifier used in URLs, cache keys and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Yahoo => "yahoo",
            Provider::AlphaVantage => "alpha_vantage",
            Provider::IexCloud => "iex_cloud",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Yahoo => "Yahoo Finance",
            Provider::AlphaVantage => "Alpha Vantage",
            Provider::IexCloud => "IEX Cloud",
        }
    }

    pub fn requires_key(&self) -> bool {
        !matches!(self, Provider::Yahoo)
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "yahoo" => Some(Provider::Yahoo),
            "alpha_vantage" => Some(Provider::AlphaVantage),
            "iex_cloud" => Some(Provider::IexCloud),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One OHLCV row as returned by a provider after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar timestamp (exchange time, naive)
    pub date: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Step between two forecast points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastInterval {
    Hour,
    Day,
    Week,
    Month,
}

impl Default for ForecastInterval {
    fn default() -> Self {
        ForecastInterval::Day
    }
}

impl ForecastInterval {
    /// Parse from string, French labels included
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "heure" | "1h" => Some(ForecastInterval::Hour),
            "day" | "jour" | "1d" => Some(ForecastInterval::Day),
            "week" | "semaine" | "1wk" => Some(ForecastInterval::Week),
            "month" | "mois" | "1mo" => Some(ForecastInterval::Month),
            _ => None,
        }
    }

    /// Timestamp one step after `from`
    pub fn advance(&self, from: NaiveDateTime) -> NaiveDateTime {
        match self {
            ForecastInterval::Hour => from + Duration::hours(1),
            ForecastInterval::Day => from + Duration::days(1),
            ForecastInterval::Week => from + Duration::weeks(1),
            ForecastInterval::Month => from
                .checked_add_months(Months::new(1))
                .unwrap_or(from + Duration::days(30)),
        }
    }
}

impl fmt::Display for ForecastInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastInterval::Hour => write!(f, "hour"),
            ForecastInterval::Day => write!(f, "day"),
            ForecastInterval::Week => write!(f, "week"),
            ForecastInterval::Month => write!(f, "month"),
        }
    }
}
