//! Iterative price forecasting
//!
//! A model predicts the next one-step difference of the target from the
//! engineered features of the series so far. Each prediction is appended
//! to the series and the features are rebuilt before the next step.
//! Confidence bounds come from the spread of recent differences.

pub mod features;
pub mod model;

pub use features::{
    make_features, prepare_data_for_ml, prepare_features_for_prediction, FeatureTable, MlData,
    TimeSeries,
};
pub use model::{
    list_models, load_model, train, validate_model_artifact, validate_model_data_compatibility,
    Compatibility, ModelArtifact, ModelEntry, ModelKind, RegressionModel, Regressor,
};

use crate::dataset::{load_path, DataFrame, DatasetError};
use crate::history::CsvRow;
use crate::stats::descriptive::{finite_or_zero, mean, std_dev};
use crate::types::ForecastInterval;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_STEPS: usize = 365;
const DEFAULT_STEPS: usize = 10;
const DEFAULT_Z: f64 = 1.96;
/// Values kept when rebuilding features; covers every window and lag
const FEATURE_TAIL: usize = 64;
const STD_WINDOW: usize = 20;
const METRICS_WINDOW: usize = 50;
const CHART_HISTORY: usize = 100;
const FALLBACK_BAND: f64 = 0.05;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Please load a data file first.")]
    NoFile,
    #[error("{0}")]
    InvalidParams(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("No ML model available. Add a .json model file to the models directory.")]
    NoModel,
    #[error("{0}")]
    InvalidArtifact(String),
    #[error("Column '{target}' not found. Available columns: {}", .available.join(", "))]
    TargetNotFound {
        target: String,
        available: Vec<String>,
    },
    #[error("{0}")]
    InsufficientData(String),
    #[error("Prediction failed: {0}")]
    Prediction(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_steps() -> usize {
    DEFAULT_STEPS
}

fn default_target() -> String {
    "Close".to_string()
}

fn default_confidence() -> f64 {
    95.0
}

fn default_forecast_type() -> String {
    "ml".to_string()
}

/// Forecast request as posted by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastParams {
    #[serde(default = "default_steps", alias = "steps")]
    pub forecast_steps: usize,
    #[serde(default = "default_target", alias = "target")]
    pub target_column: String,
    #[serde(default, alias = "model")]
    pub selected_model: Option<String>,
    #[serde(default, alias = "interval")]
    pub forecast_interval: Option<String>,
    #[serde(default = "default_confidence", alias = "confidence")]
    pub confidence_level: f64,
    #[serde(default = "default_forecast_type")]
    pub forecast_type: String,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            forecast_steps: DEFAULT_STEPS,
            target_column: default_target(),
            selected_model: None,
            forecast_interval: None,
            confidence_level: default_confidence(),
            forecast_type: default_forecast_type(),
        }
    }
}

impl ForecastParams {
    pub fn validate(&self) -> Result<ForecastInterval, ForecastError> {
        if !(1..=MAX_STEPS).contains(&self.forecast_steps) {
            return Err(ForecastError::InvalidParams(format!(
                "Number of forecast steps must be between 1 and {}",
                MAX_STEPS
            )));
        }
        match self.forecast_interval.as_deref().map(str::trim) {
            None | Some("") => Ok(ForecastInterval::default()),
            Some(raw) => ForecastInterval::from_str(raw).ok_or_else(|| {
                ForecastError::InvalidParams(format!("Unsupported forecast interval: {}", raw))
            }),
        }
    }

    /// Two-sided z-score; unknown levels fall back to 95 %
    pub fn z_score(&self) -> f64 {
        match self.confidence_level.round() as i64 {
            90 => 1.645,
            95 => 1.96,
            99 => 2.576,
            _ => DEFAULT_Z,
        }
    }
}

/// Requested target, or the first column whose name contains it or is
/// contained in it (case-insensitive)
pub fn resolve_target(frame: &DataFrame, target: &str) -> Result<String, ForecastError> {
    if frame.column(target).is_some() {
        return Ok(target.to_string());
    }
    let wanted = target.to_lowercase();
    frame
        .column_names()
        .into_iter()
        .find(|c| {
            let lower = c.to_lowercase();
            !wanted.is_empty() && (lower.contains(&wanted) || wanted.contains(&lower))
        })
        .ok_or_else(|| ForecastError::TargetNotFound {
            target: target.to_string(),
            available: frame.column_names(),
        })
}

// ─────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────

/// One forecast period as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub period: usize,
    pub date: String,
    pub forecast: f64,
    pub variation: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub historical_mean: f64,
    pub historical_std: f64,
    pub forecast_mean: f64,
    pub forecast_range: [f64; 2],
    pub confidence_range: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastChart {
    pub historical: Vec<ChartPoint>,
    pub forecast: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutcome {
    pub generated_at: String,
    pub filename: String,
    pub model: String,
    pub target_column: String,
    pub forecast_steps: usize,
    pub forecast_interval: ForecastInterval,
    pub forecast_type: String,
    pub confidence_level: f64,
    pub forecast_data: Vec<ForecastRow>,
    pub metrics: ForecastMetrics,
    pub chart: ForecastChart,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ForecastOutcome {
    /// Attachment name for the JSON download
    pub fn download_name(&self) -> String {
        format!(
            "prevision_{}.json",
            self.generated_at.replace(':', "-").replace(' ', "_")
        )
    }
}

impl CsvRow for ForecastOutcome {
    fn headers() -> Vec<&'static str> {
        vec![
            "filename",
            "model",
            "target_column",
            "forecast_steps",
            "forecast_interval",
            "confidence_level",
            "forecast_mean",
            "first_forecast",
            "last_forecast",
        ]
    }

    fn row(&self) -> Vec<String> {
        let at = |row: Option<&ForecastRow>| row.map(|r| r.forecast.to_string()).unwrap_or_default();
        vec![
            self.filename.clone(),
            self.model.clone(),
            self.target_column.clone(),
            self.forecast_steps.to_string(),
            self.forecast_interval.to_string(),
            self.confidence_level.to_string(),
            self.metrics.forecast_mean.to_string(),
            at(self.forecast_data.first()),
            at(self.forecast_data.last()),
        ]
    }
}

// ─────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────

fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

fn diffs(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

fn usable(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Spread used when recent differences are flat
fn initial_std(values: &[f64]) -> f64 {
    let all = std_dev(&diffs(values), 0);
    if usable(all) {
        return all;
    }
    let scaled = std_dev(values, 1) * 0.01;
    if usable(scaled) {
        scaled
    } else {
        1.0
    }
}

struct StepPoint {
    date: NaiveDateTime,
    value: f64,
    lower: f64,
    upper: f64,
}

struct Stepper<'a> {
    regressor: &'a dyn Regressor,
    model_columns: &'a [String],
    target: &'a str,
    interval: ForecastInterval,
    z: f64,
    initial_std: f64,
}

impl Stepper<'_> {
    fn step(&self, values: &[f64], dates: &[NaiveDateTime]) -> Result<StepPoint, ForecastError> {
        let (Some(&last), Some(&last_date)) = (values.last(), dates.last()) else {
            return Err(ForecastError::InsufficientData("Empty series".into()));
        };
        let start = values.len().saturating_sub(FEATURE_TAIL);
        let series = TimeSeries {
            target: self.target.to_string(),
            dates: Some(dates[start..].iter().map(|d| Some(*d)).collect()),
            values: values[start..].iter().map(|v| Some(*v)).collect(),
        };
        let mut table = make_features(&series);
        table.fill_gaps();
        let row = prepare_features_for_prediction(
            &table,
            self.model_columns,
            self.target,
            last,
            Some(last_date),
        );

        let predicted = self
            .regressor
            .predict(&[row])?
            .first()
            .copied()
            .ok_or_else(|| ForecastError::Prediction("model returned no value".into()))?;
        let diff = finite_or_zero(predicted);

        let recent = diffs(&values[values.len().saturating_sub(STD_WINDOW + 1)..]);
        let mut std = std_dev(&recent, 0);
        if !usable(std) {
            std = self.initial_std;
        }

        let value = last + diff;
        Ok(StepPoint {
            date: self.interval.advance(last_date),
            value,
            lower: value - self.z * std,
            upper: value + self.z * std,
        })
    }
}

/// Synthetic daily dates ending today, for series without a date column
fn synthetic_dates(n: usize) -> Vec<NaiveDateTime> {
    let today = Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    (0..n)
        .map(|i| today - chrono::Duration::days((n - i) as i64))
        .collect()
}

/// Forecast `params.forecast_steps` periods of the frame's target
pub fn run_forecast(
    frame: &DataFrame,
    filename: &str,
    regressor: &dyn Regressor,
    model_columns: &[String],
    model_label: &str,
    params: &ForecastParams,
) -> Result<ForecastOutcome, ForecastError> {
    let interval = params.validate()?;
    let z = params.z_score();
    let target = resolve_target(frame, &params.target_column)?;

    let data = prepare_data_for_ml(frame, &target)?;
    if data.y.is_empty() {
        return Err(ForecastError::InsufficientData(format!(
            "Not enough complete rows in '{}' to build features",
            target
        )));
    }
    let mut values = data.y.clone();
    let mut dates: Vec<NaiveDateTime> = data
        .dates
        .iter()
        .copied()
        .collect::<Option<Vec<_>>>()
        .unwrap_or_else(|| synthetic_dates(values.len()));

    let compatibility = validate_model_data_compatibility(model_columns, &data.feature_columns);
    for w in &compatibility.warnings {
        warn!("⚠️ {}", w);
    }

    let history_len = values.len();
    let stepper = Stepper {
        regressor,
        model_columns,
        target: &data.target,
        interval,
        z,
        initial_std: initial_std(&values),
    };

    let mut points: Vec<StepPoint> = Vec::with_capacity(params.forecast_steps);
    for step in 1..=params.forecast_steps {
        let point = match stepper.step(&values, &dates) {
            Ok(p) => p,
            Err(e) if step == 1 => return Err(e),
            Err(e) => {
                warn!(step, error = %e, "⚠️ Forecast step failed, carrying last value");
                let last = values[values.len() - 1];
                let (a, b) = (last * (1.0 - FALLBACK_BAND), last * (1.0 + FALLBACK_BAND));
                StepPoint {
                    date: interval.advance(dates[dates.len() - 1]),
                    value: last,
                    lower: a.min(b),
                    upper: a.max(b),
                }
            }
        };
        values.push(point.value);
        dates.push(point.date);
        points.push(point);
    }

    let date_fmt = match interval {
        ForecastInterval::Hour => "%Y-%m-%d %H:%M",
        _ => "%Y-%m-%d",
    };
    let historical = &values[..history_len];

    let mut previous = historical[history_len - 1];
    let forecast_data: Vec<ForecastRow> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let row = ForecastRow {
                period: i + 1,
                date: p.date.format(date_fmt).to_string(),
                forecast: round_to(p.value, 4),
                variation: round_to(p.value - previous, 6),
                lower: round_to(p.lower, 4),
                upper: round_to(p.upper, 4),
            };
            previous = p.value;
            row
        })
        .collect();

    let recent = &historical[history_len.saturating_sub(METRICS_WINDOW)..];
    let predicted: Vec<f64> = points.iter().map(|p| p.value).collect();
    let lowest = |it: &mut dyn Iterator<Item = f64>| finite_or_zero(it.fold(f64::INFINITY, f64::min));
    let highest = |it: &mut dyn Iterator<Item = f64>| finite_or_zero(it.fold(f64::NEG_INFINITY, f64::max));
    let metrics = ForecastMetrics {
        historical_mean: finite_or_zero(mean(recent)),
        historical_std: finite_or_zero(std_dev(recent, 1)),
        forecast_mean: finite_or_zero(mean(&predicted)),
        forecast_range: [
            lowest(&mut predicted.iter().copied()),
            highest(&mut predicted.iter().copied()),
        ],
        confidence_range: [
            lowest(&mut points.iter().map(|p| p.lower)),
            highest(&mut points.iter().map(|p| p.upper)),
        ],
    };

    let chart_start = history_len.saturating_sub(CHART_HISTORY);
    let chart = ForecastChart {
        historical: (chart_start..history_len)
            .map(|i| ChartPoint {
                date: dates[i].format(date_fmt).to_string(),
                value: values[i],
                lower: None,
                upper: None,
            })
            .collect(),
        forecast: forecast_data
            .iter()
            .map(|r| ChartPoint {
                date: r.date.clone(),
                value: r.forecast,
                lower: Some(r.lower),
                upper: Some(r.upper),
            })
            .collect(),
    };

    info!(
        target = %data.target,
        steps = params.forecast_steps,
        model = model_label,
        "📈 Forecast completed"
    );

    Ok(ForecastOutcome {
        generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        filename: filename.to_string(),
        model: model_label.to_string(),
        target_column: data.target,
        forecast_steps: params.forecast_steps,
        forecast_interval: interval,
        forecast_type: params.forecast_type.clone(),
        confidence_level: params.confidence_level,
        forecast_data,
        metrics,
        chart,
        warnings: compatibility.warnings,
    })
}

/// Model named in the params, or the first one available
pub fn choose_model(models_dir: &Path, params: &ForecastParams) -> Result<String, ForecastError> {
    match params.selected_model.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => list_models(models_dir)
            .into_iter()
            .next()
            .map(|m| m.file)
            .ok_or(ForecastError::NoModel),
    }
}

/// Load the session file and a model, then forecast
pub fn execute(
    upload_dir: &Path,
    models_dir: &Path,
    filename: Option<&str>,
    params: &ForecastParams,
) -> Result<ForecastOutcome, ForecastError> {
    let filename = filename.ok_or(ForecastError::NoFile)?;
    params.validate()?;
    let model_file = choose_model(models_dir, params)?;
    let artifact = load_model(models_dir, &model_file)?;
    let frame = load_path(&upload_dir.join(filename))?.frame;
    run_forecast(
        &frame,
        filename,
        &artifact.model,
        &artifact.feature_columns,
        &model_file,
        params,
    )
}
