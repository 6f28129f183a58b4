//! Statistical test endpoints

use super::extract::session_dataset;
use super::{ApiJson, AppError, AppResult, AppState};
use crate::history::TestRecord;
use crate::session::SessionHandle;
use crate::stats::{run_test, validate_test_requirements, TestKind};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/tests/available", get(available))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/tests/run", post(run))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    test: String,
    #[serde(default)]
    columns: Vec<String>,
}

/// POST /tests/run
async fn run(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    ApiJson(req): ApiJson<RunRequest>,
) -> AppResult<Json<Value>> {
    let kind = validate_test_requirements(req.test.trim(), req.columns.len())?;
    let (filename, frame) = session_dataset(&state, &session).await?;
    if let Some(missing) = req.columns.iter().find(|c| frame.column(c).is_none()) {
        return Err(AppError::bad_request(format!("Column not found: {}", missing)));
    }

    let columns = req.columns;
    let result = tokio::task::spawn_blocking(move || run_test(&frame, kind, &columns))
        .await
        .map_err(AppError::internal)??;
    info!(
        "🧪 {} on {:?}: stat={:.4} p={:.4}",
        result.test_name, result.columns, result.statistic, result.p_value
    );

    let record = TestRecord {
        test_name: result.test_name.clone(),
        filename: Some(filename),
        columns_used: result.columns.clone(),
        p_value: Some(result.p_value),
        stat_value: Some(result.statistic),
        interpretation: result.interpretation.clone(),
        full_results: serde_json::to_value(&result).map_err(AppError::internal)?,
    };
    let stored = result.clone();
    session
        .update(move |d| {
            d.last_result = Some(stored);
            d.history.add(record);
        })
        .await;

    Ok(Json(json!({ "success": true, "result": result })))
}

/// GET /tests/available
async fn available() -> Json<Value> {
    let tests: Vec<Value> = TestKind::ALL
        .iter()
        .map(|t| {
            json!({
                "id": t.as_str(),
                "name": t.display_name(),
                "description": t.description(),
                "columns": t.column_rule(),
                "normality": t.is_normality(),
            })
        })
        .collect();
    Json(json!({ "success": true, "tests": tests }))
}
