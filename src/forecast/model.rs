//! Regression models and their JSON artifacts
//!
//! An artifact is a JSON object holding a serialized smartcore model under
//! `model` and the ordered list of feature names it was trained on under
//! `feature_columns`. The model predicts the next one-step difference of
//! the target.

use super::features::{prepare_data_for_ml, MlData};
use super::ForecastError;
use crate::dataset::{secure_filename, DataFrame};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters};
use smartcore::linear::ridge_regression::{RidgeRegression, RidgeRegressionParameters};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Fewest training samples `train` accepts
pub const MIN_TRAINING_SAMPLES: usize = 10;

const MAX_COMPATIBILITY_WARNINGS: usize = 10;

/// Anything that maps feature rows to predictions
pub trait Regressor: Send + Sync {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ForecastError>;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Linear,
    Ridge,
    RandomForest,
}

impl ModelKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "linear" | "linear_regression" => Some(ModelKind::Linear),
            "ridge" | "ridge_regression" => Some(ModelKind::Ridge),
            "random_forest" | "rf" | "forest" => Some(ModelKind::RandomForest),
            _ => None,
        }
    }
}

/// Serialized smartcore regressor
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionModel {
    LinearRegression(LinearRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>),
    Ridge(RidgeRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>),
    RandomForest(RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>),
}

fn to_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>, ForecastError> {
    DenseMatrix::from_2d_vec(&rows.to_vec())
        .map_err(|e| ForecastError::Prediction(format!("invalid feature matrix: {:?}", e)))
}

impl RegressionModel {
    pub fn fit(kind: ModelKind, x: &[Vec<f64>], y: &[f64]) -> anyhow::Result<Self> {
        let matrix = DenseMatrix::from_2d_vec(&x.to_vec())
            .map_err(|e| anyhow::anyhow!("invalid training matrix: {:?}", e))?;
        let y = y.to_vec();
        let model = match kind {
            ModelKind::Linear => {
                LinearRegression::fit(&matrix, &y, LinearRegressionParameters::default())
                    .map(RegressionModel::LinearRegression)
                    .map_err(|e| anyhow::anyhow!("Linear regression training failed: {:?}", e))?
            }
            ModelKind::Ridge => RidgeRegression::fit(
                &matrix,
                &y,
                RidgeRegressionParameters::default()
                    .with_alpha(1.0)
                    .with_normalize(false),
            )
            .map(RegressionModel::Ridge)
            .map_err(|e| anyhow::anyhow!("Ridge regression training failed: {:?}", e))?,
            ModelKind::RandomForest => {
                let params = RandomForestRegressorParameters::default()
                    .with_n_trees(100)
                    .with_max_depth(8)
                    .with_min_samples_split(5);
                RandomForestRegressor::fit(&matrix, &y, params)
                    .map(RegressionModel::RandomForest)
                    .map_err(|e| anyhow::anyhow!("Random Forest training failed: {:?}", e))?
            }
        };
        Ok(model)
    }
}

impl Regressor for RegressionModel {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ForecastError> {
        let x = to_matrix(rows)?;
        let result = match self {
            RegressionModel::LinearRegression(m) => m.predict(&x),
            RegressionModel::Ridge(m) => m.predict(&x),
            RegressionModel::RandomForest(m) => m.predict(&x),
        };
        result.map_err(|e| ForecastError::Prediction(format!("{:?}", e)))
    }

    fn name(&self) -> &str {
        match self {
            RegressionModel::LinearRegression(_) => "LinearRegression",
            RegressionModel::Ridge(_) => "Ridge",
            RegressionModel::RandomForest(_) => "RandomForest",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: RegressionModel,
    pub feature_columns: Vec<String>,
    #[serde(default)]
    pub target_column: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub trained_at: Option<String>,
    #[serde(default)]
    pub n_samples: Option<usize>,
}

/// Feature name as a plain string. Tuple-like names are joined with `_`.
fn normalize_feature_name(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let joined: Vec<String> = parts
                .iter()
                .filter_map(normalize_feature_name)
                .filter(|p| !p.is_empty())
                .collect();
            Some(joined.join("_"))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Check the artifact shape and build it
pub fn validate_model_artifact(value: Value) -> Result<ModelArtifact, ForecastError> {
    let Value::Object(mut map) = value else {
        return Err(ForecastError::InvalidArtifact(
            "Invalid model file format: expected a JSON object".into(),
        ));
    };
    if !map.contains_key("model") {
        return Err(ForecastError::InvalidArtifact(
            "Model artifact has no 'model' key".into(),
        ));
    }
    let columns = match map.remove("feature_columns") {
        None => {
            return Err(ForecastError::InvalidArtifact(
                "Model artifact has no 'feature_columns' key".into(),
            ))
        }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(normalize_feature_name)
            .collect::<Vec<_>>(),
        Some(_) => {
            return Err(ForecastError::InvalidArtifact(
                "'feature_columns' must be a list".into(),
            ))
        }
    };
    if columns.is_empty() {
        return Err(ForecastError::InvalidArtifact(
            "'feature_columns' is empty".into(),
        ));
    }
    map.insert(
        "feature_columns".into(),
        Value::Array(columns.into_iter().map(Value::String).collect()),
    );
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ForecastError::InvalidArtifact(format!("Unreadable model: {}", e)))
}

/// Feature coverage between a model and the engineered table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Compatibility {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate_model_data_compatibility(model_columns: &[String], available: &[String]) -> Compatibility {
    let missing: Vec<String> = model_columns
        .iter()
        .filter(|c| !available.contains(c))
        .cloned()
        .collect();
    let extra: Vec<String> = available
        .iter()
        .filter(|c| !model_columns.contains(c))
        .cloned()
        .collect();

    let mut warnings: Vec<String> = missing
        .iter()
        .take(MAX_COMPATIBILITY_WARNINGS)
        .map(|c| format!("Feature '{}' missing from the data, default value used", c))
        .collect();
    if missing.len() > MAX_COMPATIBILITY_WARNINGS {
        warnings.push(format!(
            "... and {} more missing features",
            missing.len() - MAX_COMPATIBILITY_WARNINGS
        ));
    }
    Compatibility {
        missing,
        extra,
        warnings,
    }
}

/// A model file offered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub file: String,
    pub label: String,
}

/// `*.json` files of the models directory, sorted by name
pub fn list_models(dir: &Path) -> Vec<ModelEntry> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut models: Vec<ModelEntry> = read
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(".json"))
        .map(|file| ModelEntry {
            label: format!("Model: {}", file.trim_end_matches(".json")),
            file,
        })
        .collect();
    models.sort_by(|a, b| a.file.cmp(&b.file));
    models
}

/// Read and validate a model file by name
pub fn load_model(dir: &Path, name: &str) -> Result<ModelArtifact, ForecastError> {
    if name.is_empty() || secure_filename(name) != name || !name.ends_with(".json") {
        return Err(ForecastError::ModelNotFound(name.to_string()));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(ForecastError::ModelNotFound(name.to_string()));
    }
    let raw = fs::read_to_string(&path)?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| ForecastError::InvalidArtifact(format!("Invalid JSON in {}: {}", name, e)))?;
    validate_model_artifact(value)
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        info!("💾 Model saved to {}", path.display());
        Ok(())
    }
}

/// Pair each feature row with the following row's target difference
fn next_step_targets(data: &MlData) -> (Vec<Vec<f64>>, Vec<f64>) {
    let x: Vec<Vec<f64>> = data.x.iter().take(data.x.len().saturating_sub(1)).cloned().collect();
    let y: Vec<f64> = data.x.iter().skip(1).map(|row| row[0]).collect();
    (x, y)
}

/// Train a model on a frame's engineered features
pub fn train(frame: &DataFrame, target: &str, kind: ModelKind) -> anyhow::Result<ModelArtifact> {
    let data = prepare_data_for_ml(frame, target)?;
    let (x, y) = next_step_targets(&data);
    if x.len() < MIN_TRAINING_SAMPLES {
        return Err(ForecastError::InsufficientData(format!(
            "{} training samples after feature engineering, at least {} needed",
            x.len(),
            MIN_TRAINING_SAMPLES
        ))
        .into());
    }
    if x.len() < 100 {
        warn!(samples = x.len(), "⚠️ Small training set");
    }

    let model = RegressionModel::fit(kind, &x, &y)?;
    info!(
        model = model.name(),
        samples = x.len(),
        target = %data.target,
        "✅ Model trained"
    );
    let model_type = model.name().to_string();
    Ok(ModelArtifact {
        model,
        feature_columns: data.feature_columns,
        target_column: Some(data.target),
        model_type: Some(model_type),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        trained_at: Some(Utc::now().to_rfc3339()),
        n_samples: Some(x.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trending_frame(n: usize) -> DataFrame {
        let start = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let rows = (0..n)
            .map(|i| {
                vec![
                    Some((start + chrono::Duration::days(i as i64)).to_string()),
                    Some(format!("{}", 100.0 + i as f64 * 0.5 + ((i % 5) as f64))),
                ]
            })
            .collect();
        DataFrame::from_rows(vec!["Date".into(), "Close".into()], rows)
    }

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("boursa_models_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!(ModelKind::from_str("Ridge"), Some(ModelKind::Ridge));
        assert_eq!(ModelKind::from_str("random-forest"), Some(ModelKind::RandomForest));
        assert_eq!(ModelKind::from_str("svm"), None);
    }

    #[test]
    fn test_artifact_validation_errors() {
        let err = |v: Value| validate_model_artifact(v).unwrap_err().to_string();
        assert!(err(json!([1, 2])).contains("JSON object"));
        assert!(err(json!({"feature_columns": ["a"]})).contains("'model'"));
        assert!(err(json!({"model": {}})).contains("'feature_columns'"));
        assert!(err(json!({"model": {}, "feature_columns": "a"})).contains("must be a list"));
        assert!(err(json!({"model": {}, "feature_columns": []})).contains("empty"));
    }

    #[test]
    fn test_feature_names_are_normalized() {
        assert_eq!(normalize_feature_name(&json!(["Close", "diff"])).as_deref(), Some("Close_diff"));
        assert_eq!(normalize_feature_name(&json!(["lag", ""])).as_deref(), Some("lag"));
        assert_eq!(normalize_feature_name(&json!(3)).as_deref(), Some("3"));
        assert_eq!(normalize_feature_name(&Value::Null), None);
    }

    #[test]
    fn test_compatibility_warnings_are_capped() {
        let model: Vec<String> = (0..15).map(|i| format!("f{}", i)).collect();
        let available = vec!["f0".to_string(), "extra".to_string()];
        let c = validate_model_data_compatibility(&model, &available);
        assert_eq!(c.missing.len(), 14);
        assert_eq!(c.extra, vec!["extra"]);
        assert_eq!(c.warnings.len(), 11);
        assert!(c.warnings[10].contains("4 more"));
    }

    #[test]
    fn test_train_save_and_load() {
        let artifact = train(&trending_frame(80), "Close", ModelKind::Ridge).unwrap();
        assert_eq!(artifact.feature_columns.len(), 17);
        assert_eq!(artifact.target_column.as_deref(), Some("Close"));

        let dir = temp_dir();
        artifact.save(&dir.join("ridge.json")).unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();

        let models = list_models(&dir);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].label, "Model: ridge");

        let loaded = load_model(&dir, "ridge.json").unwrap();
        let row = vec![vec![0.0; loaded.feature_columns.len()]];
        let pred = loaded.model.predict(&row).unwrap();
        assert_eq!(pred.len(), 1);
        assert!(pred[0].is_finite());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_rejects_unsafe_names() {
        let dir = temp_dir();
        assert!(matches!(
            load_model(&dir, "../secret.json"),
            Err(ForecastError::ModelNotFound(_))
        ));
        assert!(matches!(
            load_model(&dir, "absent.json"),
            Err(ForecastError::ModelNotFound(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_train_needs_enough_rows() {
        assert!(train(&trending_frame(35), "Close", ModelKind::Ridge).is_err());
    }
}
