//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use periogt_core::{ErrorCode, ErrorDetail};
use serde_json::json;
use tracing::warn;

/// Error body: `{"error": {code, message, details?}, "request_id"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: ErrorDetail,
    pub request_id: String,
}

impl ApiError {
    pub fn from_core(err: periogt_core::Error, request_id: &str) -> Self {
        let detail = err.detail();
        let status = StatusCode::from_u16(detail.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request {} failed: {}", request_id, detail.message);
        }
        Self {
            status,
            error: detail,
            request_id: request_id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>, request_id: &str) -> Self {
        Self::from_core(periogt_core::Error::validation(msg), request_id)
    }

    pub fn unauthorized(request_id: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: ErrorDetail {
                code: ErrorCode::ValidationError,
                message: "Invalid or missing X-Api-Key".to_string(),
                details: None,
            },
            request_id: request_id.to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>, request_id: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ErrorDetail {
                code: ErrorCode::InternalError,
                message: msg.into(),
                details: None,
            },
            request_id: request_id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error,
            "request_id": self.request_id,
        }));
        (self.status, body).into_response()
    }
}
