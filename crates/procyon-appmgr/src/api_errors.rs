//! HTTP error mapping for the control-surface router.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use procyon_lifecycle::AppMgrError;

/// Service error carried to an HTTP status + JSON body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<AppMgrError> for ApiError {
    fn from(err: AppMgrError) -> Self {
        let status = match &err {
            AppMgrError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppMgrError::InvalidParam(_) => StatusCode::BAD_REQUEST,
            AppMgrError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            AppMgrError::ClientNotBound
            | AppMgrError::Remote(_)
            | AppMgrError::Queue(_)
            | AppMgrError::Launch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
