//! HTTP error type shared by every handler

use crate::auth::AuthError;
use crate::dataset::DatasetError;
use crate::forecast::ForecastError;
use crate::jobs::JobError;
use crate::stats::StatsError;
use crate::stock::StockApiError;
use crate::storage::StorageError;
use crate::visualisation::VizError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    /// Several field errors, sent back as `errors`
    #[error("{}", .0.join(" "))]
    Validation(Vec<String>),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Locked(String),
    #[error("{0}")]
    RateLimited(String),
    /// Logged, never shown to the client
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        AppError::Internal(msg.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Locked(_) => StatusCode::LOCKED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Internal(detail) => {
                error!("❌ Internal error: {}", detail);
                json!({ "success": false, "message": INTERNAL_MESSAGE })
            }
            AppError::Validation(errors) => json!({
                "success": false,
                "message": self.to_string(),
                "errors": errors,
            }),
            other => json!({ "success": false, "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────
// Conversions from module errors
// ─────────────────────────────────────────────────────────────────

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials => AppError::BadRequest(e.to_string()),
            AuthError::InvalidCredentials | AuthError::Unauthenticated => {
                AppError::Unauthorized(e.to_string())
            }
            AuthError::Locked => AppError::Locked(e.to_string()),
            AuthError::Inactive | AuthError::RegistrationDisabled | AuthError::Forbidden => {
                AppError::Forbidden(e.to_string())
            }
            AuthError::Validation(errors) => AppError::Validation(errors),
            AuthError::Storage(e) => AppError::internal(e),
        }
    }
}

impl From<StockApiError> for AppError {
    fn from(e: StockApiError) -> Self {
        if e.is_rate_limit() {
            AppError::RateLimited(e.to_string())
        } else {
            AppError::BadRequest(e.to_string())
        }
    }
}

impl From<DatasetError> for AppError {
    fn from(e: DatasetError) -> Self {
        match e {
            DatasetError::Io(e) => AppError::internal(e),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<StatsError> for AppError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::Data(e) => e.into(),
            StatsError::Numerical(msg) => AppError::Internal(msg),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<ForecastError> for AppError {
    fn from(e: ForecastError) -> Self {
        match e {
            ForecastError::ModelNotFound(_) => AppError::NotFound(e.to_string()),
            ForecastError::Dataset(e) => e.into(),
            ForecastError::Io(e) => AppError::internal(e),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<VizError> for AppError {
    fn from(e: VizError) -> Self {
        match e {
            VizError::Dataset(e) => e.into(),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<JobError> for AppError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::InvalidId(_) => AppError::BadRequest(e.to_string()),
            JobError::NotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::internal(other),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::internal(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(AppError::from(AuthError::Locked).status(), StatusCode::LOCKED);
        assert_eq!(
            AppError::from(AuthError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::from(AuthError::Inactive).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(StockApiError::RateLimitExceeded("yahoo".into())).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::from(StockApiError::InvalidSymbol).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(ForecastError::ModelNotFound("m.json".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(JobError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_internal_detail_is_hidden() {
        let response = AppError::internal("disk on fire").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], INTERNAL_MESSAGE);
    }

    #[tokio::test]
    async fn test_validation_lists_errors() {
        let response = AppError::Validation(vec!["a".into(), "b".into()]).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errors"], json!(["a", "b"]));
    }
}
