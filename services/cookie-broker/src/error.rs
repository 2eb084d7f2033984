//! HTTP error responses
//!
//! Every handler error renders as `{"status":"error","message":"..."}` with a
//! status code picked from the variant.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Errors surfaced by the webhook and admin handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<lease_pool::Error> for ApiError {
    fn from(err: lease_pool::Error) -> Self {
        match err {
            lease_pool::Error::UnknownCredential(id) => {
                ApiError::NotFound(format!("Cookie not found for cookie_id: {id}"))
            }
            lease_pool::Error::UnknownCategory(category) => {
                ApiError::BadRequest(format!("Invalid platform: {category}"))
            }
            lease_pool::Error::Store(session_store::Error::Duplicate(id)) => {
                ApiError::Conflict(format!("credential already exists: {id}"))
            }
            lease_pool::Error::Store(session_store::Error::InvalidCategory(category)) => {
                ApiError::BadRequest(format!("invalid category: {category:?}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        });
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
