//! Dataset upload and stock quote import

use super::{ApiJson, AppError, AppResult, AppState};
use crate::dataset::{secure_filename, DataFrame};
use crate::session::SessionHandle;
use crate::stock::{allow_in_window, MAX_SYMBOL_LEN};
use crate::types::Provider;
use crate::upload::{
    api_filename, content_looks_valid, mime_allowed, store_dataset, ScanVerdict, StoredDataset,
    LARGE_FETCH_ROWS, PREVIEW_ROWS,
};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const FILE_FIELD: &str = "data_file";

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/upload/api_list", get(api_list))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload_file", post(upload_file))
        .route("/clear_session_file", post(clear_session_file))
        .route("/upload/api_fetch", post(api_fetch))
}

/// Body shared by file uploads and quote imports
fn dataset_body(filename: &str, frame: &DataFrame) -> Value {
    json!({
        "success": true,
        "filename": filename,
        "columns": frame.column_names(),
        "preview": frame.preview(PREVIEW_ROWS),
        "dtypes": frame.dtypes(),
        "rows": frame.n_rows(),
    })
}

async fn remember_dataset(session: &SessionHandle, stored: &StoredDataset) {
    let columns = stored.frame.column_names();
    let dtypes = stored.frame.dtypes();
    let filename = stored.filename.clone();
    session
        .update(move |d| {
            d.current_file = Some(filename);
            d.file_columns = columns;
            d.file_dtypes = dtypes;
        })
        .await;
}

async fn store(state: &AppState, filename: String, bytes: Vec<u8>) -> AppResult<StoredDataset> {
    let dir = state.upload_dir.clone();
    let stored = tokio::task::spawn_blocking(move || store_dataset(&dir, &filename, &bytes))
        .await
        .map_err(AppError::internal)??;
    Ok(stored)
}

fn multipart_error(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(format!(
            "File too large (max {} MB)",
            limit / (1024 * 1024)
        ))
    } else {
        AppError::BadRequest(e.body_text())
    }
}

// ─────────────────────────────────────────────────────────────────
// File upload
// ─────────────────────────────────────────────────────────────────

/// POST /upload_file - multipart `data_file`
async fn upload_file(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Value>> {
    let limit = state.config.upload.max_content_length;
    let mut multipart = multipart.map_err(|_| AppError::bad_request("No file sent"))?;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        file = Some((name, content_type, bytes));
        break;
    }

    let Some((original_name, content_type, bytes)) = file else {
        return Err(AppError::bad_request("No file sent"));
    };
    if original_name.is_empty() {
        return Err(AppError::bad_request("No file selected"));
    }
    if !state.config.upload.allowed_file(&original_name) {
        return Err(AppError::bad_request("File type not allowed"));
    }
    let filename = secure_filename(&original_name);
    if filename.is_empty() || !state.config.upload.allowed_file(&filename) {
        return Err(AppError::bad_request("Invalid file name"));
    }
    if bytes.len() > limit {
        return Err(AppError::PayloadTooLarge(format!(
            "File too large (max {} MB)",
            limit / (1024 * 1024)
        )));
    }
    if !mime_allowed(content_type.as_deref()) || !content_looks_valid(&bytes) {
        warn!(
            "Upload '{}' rejected: content type {:?} or content mismatch",
            filename, content_type
        );
        return Err(AppError::bad_request("File type/MIME not allowed"));
    }

    if let Some(scanner) = &state.scanner {
        match scanner.scan(&bytes).await {
            ScanVerdict::Clean => {}
            ScanVerdict::Infected(signature) => {
                warn!("🦠 Upload '{}' rejected by antivirus: {}", filename, signature);
                return Err(AppError::bad_request("File rejected by antivirus"));
            }
            ScanVerdict::Unavailable(reason) => {
                warn!("Antivirus scan skipped for '{}': {}", filename, reason);
            }
        }
    }

    let stored = store(&state, filename, bytes.to_vec()).await?;
    remember_dataset(&session, &stored).await;
    info!("📁 File loaded: {}", stored.filename);
    Ok(Json(dataset_body(&stored.filename, &stored.frame)))
}

/// POST /clear_session_file
async fn clear_session_file(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    session.update(|d| d.clear_file()).await;
    Json(json!({ "success": true }))
}

// ─────────────────────────────────────────────────────────────────
// Stock quote import
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiFetchRequest {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

/// POST /upload/api_fetch - fetch quotes and load them as the session dataset
async fn api_fetch(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    ApiJson(req): ApiJson<ApiFetchRequest>,
) -> AppResult<Json<Value>> {
    let limit = state.config.stock_api.fetch_limit;
    let window = chrono::Duration::seconds(state.config.stock_api.fetch_window_secs as i64);
    let now = Utc::now();
    let allowed = session
        .update(|d| allow_in_window(&mut d.api_fetch_times, now, limit, window))
        .await;
    if !allowed {
        warn!("Quote fetch limit reached for session {}", &session.id()[..8]);
        return Err(AppError::RateLimited(
            "Too many requests. Please wait before fetching again.".into(),
        ));
    }

    let source = req.source.unwrap_or_default().trim().to_lowercase();
    let Some(provider) = Provider::from_str(&source) else {
        return Err(AppError::bad_request(format!(
            "Unsupported data source: {}",
            source
        )));
    };
    let symbol = req.symbol.unwrap_or_default().trim().to_string();
    if symbol.is_empty() {
        return Err(AppError::bad_request("Symbol is required"));
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        return Err(AppError::bad_request(format!(
            "Symbol too long (max {} characters)",
            MAX_SYMBOL_LEN
        )));
    }
    let interval = req.interval.filter(|i| !i.trim().is_empty());

    let bars = state
        .stock
        .fetch_stock_data(
            provider.as_str(),
            &symbol,
            interval.as_deref(),
            req.api_key.as_deref(),
        )
        .await?;

    let frame = DataFrame::from_price_bars(&bars);
    if frame.n_rows() > LARGE_FETCH_ROWS {
        warn!(
            "Large quote download: {} rows for {}",
            frame.n_rows(),
            symbol
        );
    }
    let filename = api_filename(provider.as_str(), &symbol, interval.as_deref());
    let bytes = frame.to_csv_bytes()?;
    let stored = store(&state, filename, bytes).await?;
    remember_dataset(&session, &stored).await;
    info!(
        "📈 Imported {} rows of {} from {}",
        stored.frame.n_rows(),
        symbol.to_uppercase(),
        provider.display_name()
    );
    Ok(Json(dataset_body(&stored.filename, &stored.frame)))
}

/// GET /upload/api_list
async fn api_list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "apis": state.stock.get_available_apis(),
    }))
}
