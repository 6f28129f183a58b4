//! Login, registration and account endpoints

use super::{ApiJson, AppError, AppResult, AppState};
use crate::auth::{authenticate, register, AuthError, LockoutPolicy, Registration};
use crate::session::SessionHandle;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register_user))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(profile))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/auth/users", get(users))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// POST /auth/login
async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<Value>> {
    let policy = LockoutPolicy::new(
        state.config.auth.max_login_attempts,
        state.config.auth.lockout_minutes,
    );
    let users = state.users.clone();
    let user = tokio::task::spawn_blocking(move || {
        authenticate(&users, &req.username, &req.password, policy)
    })
    .await
    .map_err(AppError::internal)??;

    let id = user.id;
    session.update(|d| d.user_id = Some(id)).await;
    Ok(Json(json!({
        "success": true,
        "message": format!("Welcome, {}!", user.username),
        "user": user.to_public(),
    })))
}

/// POST /auth/logout
async fn logout(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    session.update(|d| d.user_id = None).await;
    Json(json!({ "success": true, "message": "You have been logged out." }))
}

/// POST /auth/register
async fn register_user(
    State(state): State<AppState>,
    ApiJson(reg): ApiJson<Registration>,
) -> AppResult<Response> {
    if state.config.auth.disable_public_registration {
        return Err(AuthError::RegistrationDisabled.into());
    }
    let users = state.users.clone();
    let rounds = state.config.security.password_hash_iterations;
    let user = tokio::task::spawn_blocking(move || register(&users, &reg, rounds))
        .await
        .map_err(AppError::internal)??;
    info!("👤 Registration complete for '{}'", user.username);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user.to_public() })),
    )
        .into_response())
}

/// GET /auth/profile
async fn profile(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> AppResult<Json<Value>> {
    let user = state
        .current_user(&session)
        .await?
        .ok_or(AuthError::Unauthenticated)?;
    Ok(Json(json!({ "success": true, "user": user.to_public() })))
}

/// GET /auth/users - admin listing
async fn users(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let users: Vec<_> = state.users.list()?.iter().map(|u| u.to_public()).collect();
    Ok(Json(json!({ "success": true, "users": users })))
}
