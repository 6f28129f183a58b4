//! Background job polling

use super::{AppResult, AppState};
use crate::jobs::{is_valid_id, JobRecord, JobStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/status/:id", get(status))
        .route("/jobs/result/:id", get(result))
}

/// Unknown and malformed ids both read as missing
fn lookup(state: &AppState, id: &str) -> AppResult<Option<JobRecord>> {
    if !is_valid_id(id) {
        return Ok(None);
    }
    Ok(state.jobs.get(id)?)
}

/// GET /jobs/status/:id
async fn status(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let response = match lookup(&state, &id)? {
        None => (StatusCode::NOT_FOUND, Json(json!({ "status": "not_found" }))).into_response(),
        Some(job) => Json(json!({ "status": job.status, "error": job.error })).into_response(),
    };
    Ok(response)
}

/// GET /jobs/result/:id - 202 until the job is done
async fn result(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let response = match lookup(&state, &id)? {
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response(),
        Some(job) if job.status != JobStatus::Done => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": job.status, "error": job.error })),
        )
            .into_response(),
        Some(job) => Json(json!({ "status": "done", "result": job.result })).into_response(),
    };
    Ok(response)
}
