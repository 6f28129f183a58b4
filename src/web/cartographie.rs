//! Map endpoints: saved locations and the live-position WebSocket

use super::{ApiJson, AppError, AppResult, AppState};
use crate::cache::{get_json, set_json};
use crate::locations::{valid_coordinates, Location, PositionsMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

const LOCATIONS_CACHE_KEY: &str = "cartographie:locations";
const LOCATIONS_TTL: Duration = Duration::from_secs(15);
const DEFAULT_USERNAME: &str = "Visiteur";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cartographie/api/locations",
            get(get_locations).post(post_location),
        )
        .route("/cartographie/ws", get(websocket_handler))
}

// ─────────────────────────────────────────────────────────────────
// Saved locations
// ─────────────────────────────────────────────────────────────────

/// GET /cartographie/api/locations
async fn get_locations(State(state): State<AppState>) -> AppResult<Json<Value>> {
    if let Some(users) = get_json::<Vec<Location>>(state.cache.as_ref(), LOCATIONS_CACHE_KEY).await {
        return Ok(Json(json!({ "success": true, "users": users })));
    }
    let locations = state.locations.clone();
    let users = tokio::task::spawn_blocking(move || locations.get_all_locations())
        .await
        .map_err(AppError::internal)??;
    set_json(state.cache.as_ref(), LOCATIONS_CACHE_KEY, &users, LOCATIONS_TTL).await;
    Ok(Json(json!({ "success": true, "users": users })))
}

#[derive(Debug, Deserialize)]
struct LocationPayload {
    username: Option<String>,
    lat: Option<Value>,
    latitude: Option<Value>,
    lon: Option<Value>,
    longitude: Option<Value>,
    active_users: Option<Value>,
}

/// Numbers may arrive as JSON numbers or numeric strings
fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn present(v: &Option<Value>) -> Option<&Value> {
    v.as_ref().filter(|v| !v.is_null())
}

/// POST /cartographie/api/locations
async fn post_location(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LocationPayload>,
) -> AppResult<Json<Value>> {
    let username = payload
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_USERNAME)
        .to_string();
    let lat = present(&payload.lat).or(present(&payload.latitude));
    let lon = present(&payload.lon).or(present(&payload.longitude));
    let (Some(lat), Some(lon)) = (lat, lon) else {
        return Err(AppError::bad_request("Latitude and longitude are required"));
    };
    let (Some(lat), Some(lon)) = (as_f64(lat), as_f64(lon)) else {
        return Err(AppError::bad_request("Invalid latitude/longitude"));
    };
    if !valid_coordinates(lat, lon) {
        return Err(AppError::bad_request("Latitude/longitude out of range"));
    }
    let active_users = match present(&payload.active_users) {
        None => 1,
        Some(v) => as_f64(v)
            .filter(|n| n.fract() == 0.0)
            .map(|n| n as i64)
            .ok_or_else(|| AppError::bad_request("Invalid active_users"))?,
    };

    let locations = state.locations.clone();
    let name = username.clone();
    tokio::task::spawn_blocking(move || locations.save_user_location(&name, lat, lon, active_users))
        .await
        .map_err(AppError::internal)?
        .map_err(|e| {
            error!("❌ Could not save location for '{}': {}", username, e);
            AppError::from(e)
        })?;
    state.cache.delete(LOCATIONS_CACHE_KEY).await;
    info!("📍 Location saved for '{}'", username);

    Ok(Json(json!({ "success": true, "status": "ok" })))
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Handler
// ─────────────────────────────────────────────────────────────────

/// Messages sent by map clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    LocationUpdate {
        lat: f64,
        lon: f64,
        #[serde(default)]
        username: Option<String>,
    },
}

/// WebSocket upgrade handler
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Outgoing message type for WebSocket
enum OutgoingMessage {
    Text(String),
    Pong(Vec<u8>),
}

async fn apply_client_message(state: &AppState, connection: &str, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::LocationUpdate { lat, lon, username }) => {
            if !valid_coordinates(lat, lon) {
                debug!("Ignoring out-of-range position from {}", connection);
                return;
            }
            let username = username
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or(DEFAULT_USERNAME)
                .to_string();
            state.live.update(connection, &username, lat, lon).await;
            state.broadcaster.broadcast_positions(&state.live).await;
        }
        Err(e) => debug!("Ignoring WebSocket message: {}", e),
    }
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    use futures_util::{SinkExt, StreamExt};

    let connection = uuid::Uuid::new_v4().simple().to_string();
    info!("🗺️ New map WebSocket connection {}", &connection[..8]);

    let (mut sender, mut receiver) = socket.split();

    // Send current positions
    let initial = PositionsMessage::Positions {
        positions: state.live.snapshot().await,
    };
    if let Ok(json) = serde_json::to_string(&initial) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    // Subscribe to broadcasts
    let mut rx = state.broadcaster.subscribe();

    // Channel for outgoing messages
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<OutgoingMessage>(32);

    // Spawn task to send outgoing messages
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                OutgoingMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutgoingMessage::Pong(data) => sender.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            // Broadcast updates
            broadcast_msg = rx.recv() => {
                match broadcast_msg {
                    Ok(msg) => {
                        if out_tx.send(OutgoingMessage::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Map client {} skipped {} updates", &connection[..8], n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            // Incoming messages
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if out_tx.send(OutgoingMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        apply_client_message(&state, &connection, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    if state.live.remove(&connection).await {
        state.broadcaster.broadcast_positions(&state.live).await;
    }
    info!("🗺️ Map WebSocket connection {} closed", &connection[..8]);
}
