//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::CoreError;

/// Error wrapper that renders as a JSON problem body.
pub struct ApiError(pub CoreError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) | CoreError::NotAMember(_) => StatusCode::FORBIDDEN,
            CoreError::RoomFull { .. } | CoreError::ResyncRequired(_) => StatusCode::CONFLICT,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Backpressure(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Store(_) | CoreError::Io(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}
