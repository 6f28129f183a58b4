//! Forecast endpoints: models, synchronous and background runs, history

use super::extract::attachment;
use super::history::{FormatQuery, PageQuery};
use super::{ApiJson, AppError, AppResult, AppState};
use crate::dataset::secure_filename;
use crate::forecast::features::feature_names;
use crate::forecast::{
    execute, list_models, validate_model_artifact, validate_model_data_compatibility,
    ForecastOutcome, ForecastParams,
};
use crate::history::{export_csv, export_json, paginate, ExportFormat, ITEMS_PER_PAGE};
use crate::session::SessionHandle;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Local;
use serde_json::{json, Value};
use std::fs;
use tracing::{error, info};

const MODEL_FIELD: &str = "model_file";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/previsions/models", get(models).post(upload_model))
        .route("/previsions/run", post(run))
        .route("/previsions/jobs", post(submit_job))
        .route("/previsions/last", get(last))
        .route("/previsions/history", get(history))
        .route("/previsions/clear_forecast_history", post(clear_history))
}

pub fn export_routes() -> Router<AppState> {
    Router::new()
        .route("/previsions/download_forecast", get(download_forecast))
        .route(
            "/previsions/download_forecast_history",
            get(download_forecast_history),
        )
}

async fn remember_forecast(session: &SessionHandle, outcome: ForecastOutcome) {
    session
        .update(move |d| {
            d.forecast_history.add(outcome.clone());
            d.last_forecast = Some(outcome);
        })
        .await;
}

// ─────────────────────────────────────────────────────────────────
// Models
// ─────────────────────────────────────────────────────────────────

/// GET /previsions/models
async fn models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "models": list_models(&state.models_dir) }))
}

/// POST /previsions/models - multipart `model_file` holding a JSON artifact
async fn upload_model(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Value>> {
    let mut multipart = multipart.map_err(|_| AppError::bad_request("No file sent"))?;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        if field.name() != Some(MODEL_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        file = Some((name, bytes));
        break;
    }
    let Some((name, bytes)) = file else {
        return Err(AppError::bad_request("No file sent"));
    };
    let filename = secure_filename(&name);
    if filename.is_empty() || !filename.to_lowercase().ends_with(".json") {
        return Err(AppError::bad_request("Model files must be .json artifacts"));
    }

    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::bad_request(format!("Invalid JSON: {}", e)))?;
    let artifact = validate_model_artifact(value)?;

    // Compare with what the loaded dataset would provide
    let warnings = if session.read(|d| d.current_file.is_some()).await {
        let target = artifact.target_column.clone().unwrap_or_else(|| "Close".into());
        validate_model_data_compatibility(&artifact.feature_columns, &feature_names(&target))
            .warnings
    } else {
        Vec::new()
    };

    let dir = state.models_dir.clone();
    let path = dir.join(&filename);
    let tmp = dir.join(format!(".{}.tmp", filename));
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        fs::create_dir_all(&dir)?;
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)
    })
    .await
    .map_err(AppError::internal)?
    .map_err(AppError::internal)?;
    info!("💾 Model uploaded: {}", filename);

    Ok(Json(json!({
        "success": true,
        "model": filename,
        "feature_columns": artifact.feature_columns,
        "target_column": artifact.target_column,
        "model_type": artifact.model_type,
        "warnings": warnings,
    })))
}

// ─────────────────────────────────────────────────────────────────
// Runs
// ─────────────────────────────────────────────────────────────────

/// POST /previsions/run - forecast in the request
async fn run(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    ApiJson(params): ApiJson<ForecastParams>,
) -> AppResult<Json<Value>> {
    let filename = session.read(|d| d.current_file.clone()).await;
    let upload_dir = state.upload_dir.clone();
    let models_dir = state.models_dir.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        execute(&upload_dir, &models_dir, filename.as_deref(), &params)
    })
    .await
    .map_err(AppError::internal)??;

    remember_forecast(&session, outcome.clone()).await;
    Ok(Json(json!({ "success": true, "forecast": outcome })))
}

/// POST /previsions/jobs - forecast in the background, poll /jobs/status/{id}
async fn submit_job(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    ApiJson(params): ApiJson<ForecastParams>,
) -> AppResult<Response> {
    let Some(filename) = session.read(|d| d.current_file.clone()).await else {
        return Err(AppError::bad_request("Please load a data file first."));
    };
    params.validate()?;

    let meta = json!({ "kind": "forecast", "filename": filename, "params": params });
    let job_id = state.jobs.create(meta)?;
    info!("⏳ Forecast job {} queued for {}", job_id, filename);

    let jobs = state.jobs.clone();
    let upload_dir = state.upload_dir.clone();
    let models_dir = state.models_dir.clone();
    let id = job_id.clone();
    tokio::spawn(async move {
        let outcome = tokio::task::spawn_blocking(move || {
            execute(&upload_dir, &models_dir, Some(&filename), &params)
        })
        .await;

        let stored = match outcome {
            Ok(Ok(outcome)) => {
                let result = serde_json::to_value(&outcome).unwrap_or(Value::Null);
                remember_forecast(&session, outcome).await;
                jobs.complete(&id, result)
            }
            Ok(Err(e)) => jobs.fail(&id, &e.to_string()),
            Err(e) => jobs.fail(&id, &format!("Forecast task aborted: {}", e)),
        };
        if let Err(e) = stored {
            error!("❌ Could not record job {}: {}", id, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "job_id": job_id, "status": "pending" })),
    )
        .into_response())
}

// ─────────────────────────────────────────────────────────────────
// Last forecast and history
// ─────────────────────────────────────────────────────────────────

/// GET /previsions/last
async fn last(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    let forecast = session.read(|d| d.last_forecast.clone()).await;
    Json(json!({ "success": true, "forecast": forecast }))
}

/// GET /previsions/download_forecast
async fn download_forecast(Extension(session): Extension<SessionHandle>) -> AppResult<Response> {
    let Some(forecast) = session.read(|d| d.last_forecast.clone()).await else {
        return Err(AppError::not_found("No forecast to download."));
    };
    let bytes = serde_json::to_vec_pretty(&forecast).map_err(AppError::internal)?;
    Ok(attachment(bytes, "application/json", &forecast.download_name()))
}

/// GET /previsions/history?page=N
async fn history(
    Extension(session): Extension<SessionHandle>,
    Query(query): Query<PageQuery>,
) -> Json<Value> {
    let page = session
        .read(|d| {
            paginate(
                d.forecast_history.entries(),
                query.page.unwrap_or(1),
                ITEMS_PER_PAGE,
            )
        })
        .await;
    Json(json!({ "success": true, "history": page }))
}

/// GET /previsions/download_forecast_history?format=json|csv
async fn download_forecast_history(
    Extension(session): Extension<SessionHandle>,
    Query(query): Query<FormatQuery>,
) -> AppResult<Response> {
    let format = ExportFormat::from_str(query.format.as_deref())
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let entries = session.read(|d| d.forecast_history.entries().to_vec()).await;
    if entries.is_empty() {
        return Err(AppError::not_found("No forecast history to download."));
    }
    let bytes = match format {
        ExportFormat::Json => export_json(&entries)?,
        ExportFormat::Csv => export_csv(&entries)?,
    };
    let filename = format!(
        "historique_previsions_{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    Ok(attachment(bytes, format.content_type(), &filename))
}

/// POST /previsions/clear_forecast_history
async fn clear_history(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    session
        .update(|d| {
            d.forecast_history.clear();
            d.last_forecast = None;
        })
        .await;
    Json(json!({ "success": true, "message": "Forecast history cleared" }))
}
