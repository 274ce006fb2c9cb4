//! Mapping of control-plane errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::ControlError;
use crate::storage::DatabaseError;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Control(#[from] ControlError),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Control(e) => match e {
                ControlError::Validation(_) | ControlError::MissingCredential(_) => {
                    StatusCode::BAD_REQUEST
                }
                ControlError::NotFound(_) => StatusCode::NOT_FOUND,
                ControlError::ExternalProcess { .. } => StatusCode::BAD_GATEWAY,
                ControlError::Artifact(_) | ControlError::Database(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "API request failed");
        }
        let body = match &self {
            Self::Control(ControlError::ExternalProcess { message, output }) => {
                json!({ "error": message, "output": output })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self::Control(e.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
