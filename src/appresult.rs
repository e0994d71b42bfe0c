use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{error::RelayError, uploads::UploadError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<RelayError>() {
            return match err {
                RelayError::Authentication(_) => StatusCode::UNAUTHORIZED,
                RelayError::InvalidMessage(_) | RelayError::InvalidIdentity(_) => {
                    StatusCode::BAD_REQUEST
                }
                RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
                RelayError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
        }
        if let Some(err) = self.0.downcast_ref::<UploadError>() {
            return match err {
                UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("request failed: {:#}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
