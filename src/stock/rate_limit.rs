//! Sliding-window request limits

use super::{quota, StockApiError};
use crate::types::Provider;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Drop stamps older than `window`, then record `now` if fewer than
/// `limit` remain. Returns whether the request fits.
pub fn allow_in_window(
    stamps: &mut Vec<DateTime<Utc>>,
    now: DateTime<Utc>,
    limit: usize,
    window: Duration,
) -> bool {
    stamps.retain(|ts| now - *ts < window);
    if stamps.len() >= limit {
        return false;
    }
    stamps.push(now);
    true
}

#[derive(Default)]
struct Windows {
    minute: Vec<DateTime<Utc>>,
    day: Vec<DateTime<Utc>>,
}

/// Per-provider quotas, tracked per caller identifier
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(Provider, String), Windows>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, provider: Provider, identifier: &str) -> Result<(), StockApiError> {
        self.check_at(provider, identifier, Utc::now())
    }

    pub fn check_at(
        &self,
        provider: Provider,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StockApiError> {
        let quota = quota(provider);
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let entry = windows
            .entry((provider, identifier.to_string()))
            .or_default();

        entry.minute.retain(|ts| now - *ts < Duration::seconds(60));
        if entry.minute.len() >= quota.requests_per_minute as usize {
            return Err(StockApiError::RateLimitExceeded(format!(
                "Rate limit exceeded for {}: {} requests/min maximum",
                provider, quota.requests_per_minute
            )));
        }

        if let Some(per_day) = quota.requests_per_day {
            entry.day.retain(|ts| now - *ts < Duration::hours(24));
            if entry.day.len() >= per_day as usize {
                return Err(StockApiError::RateLimitExceeded(format!(
                    "Rate limit exceeded for {}: {} requests/day maximum",
                    provider, per_day
                )));
            }
            entry.day.push(now);
        }

        entry.minute.push(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_vantage_minute_limit() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for _ in 0..5 {
            limiter.check_at(Provider::AlphaVantage, "global", now).unwrap();
        }
        let err = limiter
            .check_at(Provider::AlphaVantage, "global", now)
            .unwrap_err();
        assert!(err.is_rate_limit());
        assert!(err.to_string().contains("5 requests/min"));

        // Other identifiers and providers are independent
        limiter.check_at(Provider::AlphaVantage, "other", now).unwrap();
        limiter.check_at(Provider::Yahoo, "global", now).unwrap();

        // The window slides
        limiter
            .check_at(Provider::AlphaVantage, "global", now + Duration::seconds(61))
            .unwrap();
    }

    #[test]
    fn test_alpha_vantage_daily_limit() {
        let limiter = RateLimiter::new();
        let start = Utc::now();
        for i in 0..500 {
            let at = start + Duration::seconds(61 * (i / 5) as i64);
            limiter.check_at(Provider::AlphaVantage, "global", at).unwrap();
        }
        let later = start + Duration::hours(12);
        let err = limiter
            .check_at(Provider::AlphaVantage, "global", later)
            .unwrap_err();
        assert!(err.to_string().contains("500 requests/day"));
    }

    #[test]
    fn test_allow_in_window() {
        let mut stamps = Vec::new();
        let now = Utc::now();
        for _ in 0..10 {
            assert!(allow_in_window(&mut stamps, now, 10, Duration::seconds(60)));
        }
        assert!(!allow_in_window(&mut stamps, now, 10, Duration::seconds(60)));
        assert!(allow_in_window(
            &mut stamps,
            now + Duration::seconds(60),
            10,
            Duration::seconds(60)
        ));
        assert_eq!(stamps.len(), 1);
    }
}
