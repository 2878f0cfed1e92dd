//! HTTP mapping of room errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{domain::RoomError, infrastructure::dto::http::ErrorResponse};

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError(pub RoomError);

impl From<RoomError> for ApiError {
    fn from(e: RoomError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            RoomError::RoomNotFound(_) => (StatusCode::NOT_FOUND, "roomNotFound"),
            RoomError::NotAMember(_) => (StatusCode::NOT_FOUND, "notAMember"),
            RoomError::InvalidToken => (StatusCode::NOT_FOUND, "invalidToken"),
            RoomError::RoomFull { .. } => (StatusCode::CONFLICT, "roomFull"),
            RoomError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalidInput"),
            RoomError::Busy { .. } => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            RoomError::StoreUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storeUnavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
