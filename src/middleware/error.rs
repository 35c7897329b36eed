//! JSON rendering of [`AppError`]

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppErrorKind, ErrorCode, ExternalError};

/// Body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: error.is_retryable().then_some(true),
        }
    }
}

/// Seconds a rate-limited caller should wait, when upstream told us
fn retry_after(error: &AppError) -> Option<u64> {
    match &error.kind {
        AppErrorKind::External(ExternalError::RateLimit { retry_after, .. }) => *retry_after,
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.error_code();

        match status {
            s if s.is_server_error() => tracing::error!(
                code = ?code,
                context = self.context.as_deref().unwrap_or(""),
                request_id = self.request_id.as_deref().unwrap_or(""),
                status = status.as_u16(),
                error = ?self.kind,
                "request failed"
            ),
            // still settling on chain, not a failure
            StatusCode::ACCEPTED => tracing::debug!(
                request_id = self.request_id.as_deref().unwrap_or(""),
                "payment not confirmed yet"
            ),
            _ => tracing::warn!(
                code = ?code,
                request_id = self.request_id.as_deref().unwrap_or(""),
                status = status.as_u16(),
                "request rejected"
            ),
        }

        let wait = retry_after(&self);
        let mut response = (status, Json(ErrorResponse::from_app_error(&self))).into_response();
        if let Some(secs) = wait {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
