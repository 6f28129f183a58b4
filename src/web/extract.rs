//! Request extractors and response helpers shared by handlers

use super::{AppError, AppResult, AppState};
use crate::dataset::{load_path, DataFrame, DatasetError};
use crate::session::SessionHandle;
use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;

/// `Json<T>` whose rejections use the API error body
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body too large".into())
    } else {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Name and parsed contents of the session's dataset
pub async fn session_dataset(
    state: &AppState,
    session: &SessionHandle,
) -> AppResult<(String, DataFrame)> {
    let Some(filename) = session.read(|d| d.current_file.clone()).await else {
        return Err(AppError::bad_request("Please load a data file first."));
    };
    let path = state.upload_dir.join(&filename);
    let loaded = tokio::task::spawn_blocking(move || load_path(&path))
        .await
        .map_err(AppError::internal)?;
    match loaded {
        Ok(loaded) => Ok((filename, loaded.frame)),
        Err(DatasetError::NotFound(_)) => {
            session.update(|d| d.clear_file()).await;
            Err(AppError::bad_request(
                "The loaded file is no longer available. Please upload it again.",
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// File download; never cached
pub fn attachment(bytes: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        [
            (CONTENT_TYPE, content_type.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
            (CACHE_CONTROL, "no-store".to_string()),
        ],
        bytes,
    )
        .into_response()
}
