//! Landing, description and health endpoints

use super::AppState;
use crate::session::SessionHandle;
use crate::stats::TestKind;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/accueil", get(index))
        .route("/description", get(description))
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "profile": state.config.profile.as_str(),
        "cache": state.cache.backend(),
        "sessions": state.sessions.len().await,
    }))
}

/// GET / and /accueil - session overview
async fn index(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> impl IntoResponse {
    let (current_file, columns, history_len, has_forecast, user_id) = session
        .read(|d| {
            (
                d.current_file.clone(),
                d.file_columns.clone(),
                d.history.len(),
                d.last_forecast.is_some(),
                d.user_id,
            )
        })
        .await;
    let user = match user_id {
        Some(id) => state.users.find_by_id(id).ok().flatten().map(|u| u.to_public()),
        None => None,
    };

    Json(json!({
        "success": true,
        "app": "Boursa",
        "current_file": current_file,
        "columns": columns,
        "history_count": history_len,
        "has_forecast": has_forecast,
        "user": user,
    }))
}

/// GET /description - what the service offers
async fn description(State(state): State<AppState>) -> impl IntoResponse {
    let tests: Vec<_> = TestKind::ALL
        .iter()
        .map(|t| json!({ "id": t.as_str(), "name": t.display_name(), "description": t.description() }))
        .collect();

    Json(json!({
        "success": true,
        "features": [
            "CSV / Excel upload",
            "Non-parametric statistical tests",
            "Interactive charts",
            "ML forecasts",
            "Stock quotes",
            "History and export",
            "User map",
        ],
        "tests": tests,
        "stock_apis": state.stock.get_available_apis(),
        "upload": {
            "allowed_extensions": state.config.upload.allowed_extensions,
            "max_content_length": state.config.upload.max_content_length,
        },
    }))
}
