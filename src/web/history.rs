//! Test history, last result and downloads

use super::extract::attachment;
use super::{AppError, AppResult, AppState};
use crate::history::{export_csv, export_json, paginate, ExportFormat, ITEMS_PER_PAGE};
use crate::session::SessionHandle;
use axum::extract::Query;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/historique", get(history))
        .route("/resultats", get(last_result))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/historique/clear", post(clear))
}

pub fn export_routes() -> Router<AppState> {
    Router::new()
        .route("/resultats/download_last_result", get(download_last_result))
        .route("/resultats/download_history", get(download_history))
}

#[derive(Debug, Deserialize)]
pub(super) struct PageQuery {
    pub page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FormatQuery {
    pub format: Option<String>,
}

/// GET /historique?page=N
async fn history(
    Extension(session): Extension<SessionHandle>,
    Query(query): Query<PageQuery>,
) -> Json<Value> {
    let page = session
        .read(|d| paginate(d.history.entries(), query.page.unwrap_or(1), ITEMS_PER_PAGE))
        .await;
    Json(json!({ "success": true, "history": page }))
}

/// POST /historique/clear - also forgets the last result
async fn clear(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    session
        .update(|d| {
            d.history.clear();
            d.last_result = None;
        })
        .await;
    Json(json!({ "success": true, "message": "History cleared" }))
}

/// GET /resultats
async fn last_result(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    let result = session.read(|d| d.last_result.clone()).await;
    Json(json!({ "success": true, "result": result }))
}

/// GET /resultats/download_last_result
async fn download_last_result(
    Extension(session): Extension<SessionHandle>,
) -> AppResult<Response> {
    let Some(result) = session.read(|d| d.last_result.clone()).await else {
        return Err(AppError::not_found("No result to download."));
    };
    let bytes = serde_json::to_vec_pretty(&result).map_err(AppError::internal)?;
    let filename = format!(
        "resultat_{}_{}.json",
        result.test.as_str(),
        Local::now().format("%Y%m%d_%H%M%S")
    );
    Ok(attachment(bytes, "application/json", &filename))
}

/// GET /resultats/download_history?format=json|csv
async fn download_history(
    Extension(session): Extension<SessionHandle>,
    Query(query): Query<FormatQuery>,
) -> AppResult<Response> {
    let format = ExportFormat::from_str(query.format.as_deref())
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let entries = session.read(|d| d.history.entries().to_vec()).await;
    if entries.is_empty() {
        return Err(AppError::not_found("No history to download."));
    }
    let bytes = match format {
        ExportFormat::Json => export_json(&entries)?,
        ExportFormat::Csv => export_csv(&entries)?,
    };
    let filename = format!(
        "historique_tests_{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    Ok(attachment(bytes, format.content_type(), &filename))
}
