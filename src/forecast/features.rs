//! Feature engineering over a single target series
//!
//! Every feature is derived from the target column: differences, lagged
//! differences, rolling means and volatility, plus calendar fields taken
//! from the date index. Rolling windows only produce a value once the
//! window is full and free of gaps.

use super::ForecastError;
use crate::dataset::{parse_datetime, DataFrame};
use chrono::{Datelike, NaiveDateTime};

pub const LAGS: [usize; 6] = [1, 2, 3, 5, 7, 14];
pub const DIFF_WINDOWS: [usize; 3] = [3, 7, 14];
pub const PRICE_WINDOWS: [usize; 3] = [7, 14, 30];
pub const VOLATILITY_WINDOW: usize = 20;

/// Feature names produced for `target`, in model order
pub fn feature_names(target: &str) -> Vec<String> {
    let mut names = vec![format!("{}_diff", target)];
    names.extend(LAGS.iter().map(|l| format!("lag_diff_{}", l)));
    names.extend(DIFF_WINDOWS.iter().map(|w| format!("ma_diff_{}", w)));
    names.extend(PRICE_WINDOWS.iter().map(|w| format!("ma_price_{}", w)));
    names.extend(["day_of_week", "day_of_month", "month", "volatility"].map(String::from));
    names
}

/// Target series with its optional date index
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub target: String,
    /// `None` when the frame has no date-like column
    pub dates: Option<Vec<Option<NaiveDateTime>>>,
    pub values: Vec<Option<f64>>,
}

/// First column whose name mentions a date or a time
pub fn detect_date_column(frame: &DataFrame) -> Option<String> {
    frame
        .column_names()
        .into_iter()
        .find(|c| {
            let lower = c.to_lowercase();
            lower.contains("date") || lower.contains("time")
        })
}

/// Target column as given, or the first column that looks like a price
pub fn resolve_ml_target(frame: &DataFrame, target: &str) -> Result<String, ForecastError> {
    if frame.column(target).is_some() {
        return Ok(target.to_string());
    }
    frame
        .column_names()
        .into_iter()
        .find(|c| {
            let lower = c.to_lowercase();
            lower.contains("close") || lower.contains("price") || lower.contains("value")
        })
        .ok_or_else(|| ForecastError::TargetNotFound {
            target: target.to_string(),
            available: frame.column_names(),
        })
}

impl TimeSeries {
    /// Extract the target series, sorted by date when a date column exists
    pub fn from_frame(frame: &DataFrame, target: &str) -> Result<Self, ForecastError> {
        let target = resolve_ml_target(frame, target)?;
        let values = frame.numeric(&target)?;
        let dates = detect_date_column(frame).and_then(|name| {
            frame.column(&name).map(|col| {
                col.values
                    .iter()
                    .map(|v| v.as_deref().and_then(parse_datetime))
                    .collect::<Vec<_>>()
            })
        });

        let series = match dates {
            Some(dates) => {
                let mut order: Vec<usize> = (0..values.len()).collect();
                // Unparsed dates sort last
                order.sort_by_key(|&i| (dates[i].is_none(), dates[i]));
                TimeSeries {
                    target,
                    dates: Some(order.iter().map(|&i| dates[i]).collect()),
                    values: order.iter().map(|&i| values[i]).collect(),
                }
            }
            None => TimeSeries {
                target,
                dates: None,
                values,
            },
        };
        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Feature rows aligned with the input series; `None` marks a gap
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl FeatureTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Backward fill, then forward fill, then zero
    pub fn fill_gaps(&mut self) {
        for col in 0..self.columns.len() {
            let mut next: Option<f64> = None;
            for row in self.rows.iter_mut().rev() {
                match row[col] {
                    Some(v) => next = Some(v),
                    None => row[col] = next,
                }
            }
            let mut prev: Option<f64> = None;
            for row in self.rows.iter_mut() {
                match row[col] {
                    Some(v) => prev = Some(v),
                    None => row[col] = prev.or(Some(0.0)),
                }
            }
        }
    }

    /// Last row with gaps read as zero
    pub fn last_row(&self) -> Option<Vec<f64>> {
        self.rows
            .last()
            .map(|r| r.iter().map(|v| v.unwrap_or(0.0)).collect())
    }
}

fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let sum: Option<f64> = slice.iter().copied().sum();
            sum.map(|s| s / window as f64)
        })
        .collect()
}

fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window || window < 2 {
                return None;
            }
            let slice: Option<Vec<f64>> = values[i + 1 - window..=i].iter().copied().collect();
            let slice = slice?;
            let mean = slice.iter().sum::<f64>() / window as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
            Some(var.sqrt())
        })
        .collect()
}

/// Build the feature table of a series
pub fn make_features(series: &TimeSeries) -> FeatureTable {
    let n = series.len();
    let values = &series.values;
    let diff: Vec<Option<f64>> = (0..n)
        .map(|i| match (i.checked_sub(1).and_then(|j| values[j]), values[i]) {
            (Some(prev), Some(cur)) => Some(cur - prev),
            _ => None,
        })
        .collect();

    let mut columns: Vec<Vec<Option<f64>>> = vec![diff.clone()];
    for lag in LAGS {
        columns.push((0..n).map(|i| i.checked_sub(lag).and_then(|j| diff[j])).collect());
    }
    for w in DIFF_WINDOWS {
        columns.push(rolling_mean(&diff, w));
    }
    for w in PRICE_WINDOWS {
        columns.push(rolling_mean(values, w));
    }

    let calendar = |f: fn(&NaiveDateTime) -> f64, default: f64| -> Vec<Option<f64>> {
        match &series.dates {
            Some(dates) => dates.iter().map(|d| d.as_ref().map(f)).collect(),
            None => vec![Some(default); n],
        }
    };
    columns.push(calendar(|d| d.weekday().num_days_from_monday() as f64, 0.0));
    columns.push(calendar(|d| d.day() as f64, 1.0));
    columns.push(calendar(|d| d.month() as f64, 1.0));
    columns.push(rolling_std(values, VOLATILITY_WINDOW));

    let rows = (0..n)
        .map(|i| columns.iter().map(|c| c[i]).collect())
        .collect();
    FeatureTable {
        columns: feature_names(&series.target),
        rows,
    }
}

/// Training view of a frame: complete feature rows and their targets
#[derive(Debug, Clone)]
pub struct MlData {
    pub target: String,
    pub feature_columns: Vec<String>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    /// Dates of the kept rows (`None` without a date column)
    pub dates: Vec<Option<NaiveDateTime>>,
}

/// Date index, target fallback, numeric coercion and feature engineering,
/// keeping only the rows where the target and every feature are present
pub fn prepare_data_for_ml(frame: &DataFrame, target: &str) -> Result<MlData, ForecastError> {
    let series = TimeSeries::from_frame(frame, target)?;
    let table = make_features(&series);

    let mut data = MlData {
        target: series.target.clone(),
        feature_columns: table.columns.clone(),
        x: Vec::new(),
        y: Vec::new(),
        dates: Vec::new(),
    };
    for (i, row) in table.rows.iter().enumerate() {
        let (Some(y), Some(x)) = (series.values[i], row.iter().copied().collect::<Option<Vec<f64>>>()) else {
            continue;
        };
        data.x.push(x);
        data.y.push(y);
        data.dates
            .push(series.dates.as_ref().and_then(|d| d[i]));
    }
    Ok(data)
}

/// Model input for the last row of `table`. Columns the table lacks get
/// a default: lags and differences 0, moving averages the last target,
/// volatility 0, calendar fields from `last_date`, anything else 0.
pub fn prepare_features_for_prediction(
    table: &FeatureTable,
    model_columns: &[String],
    target: &str,
    last_target: f64,
    last_date: Option<NaiveDateTime>,
) -> Vec<f64> {
    let last = table.last_row().unwrap_or_default();
    model_columns
        .iter()
        .map(|col| {
            if let Some(v) = table.column_index(col).and_then(|i| last.get(i)) {
                return *v;
            }
            if col == target {
                return last_target;
            }
            let lower = col.to_lowercase();
            if lower.contains("lag") || lower.contains("diff") {
                0.0
            } else if lower.contains("ma") {
                last_target
            } else if lower.contains("volatility") {
                0.0
            } else if lower.contains("day_of") || lower.contains("month") {
                match last_date {
                    Some(d) if lower.contains("day_of_week") => d.weekday().num_days_from_monday() as f64,
                    Some(d) if lower.contains("day_of_month") => d.day() as f64,
                    Some(d) if lower.contains("month") => d.month() as f64,
                    _ => 0.0,
                }
            } else {
                0.0
            }
        })
        .collect()
}
