//! Error-to-HTTP response conversion.
//!
//! Handlers return `Result<T, AppError>` and use `?` on
//! [`mediaforge_common::Error`] directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mediaforge_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: Error,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self { inner }
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            Error::Validation(_) => "validation_error",
            Error::Storage(_) => "storage_error",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Io { .. } if status == StatusCode::INSUFFICIENT_STORAGE => "insufficient_storage",
            Error::Io { .. } => "io_error",
            Error::NotFound { .. } => "not_found",
            Error::Backpressure { .. } => "backpressure",
            Error::Timeout { .. } => "timeout",
            Error::Tool { .. } => "tool_error",
            Error::Cancelled => "cancelled",
            Error::AlreadyTerminal { .. } => "already_terminal",
            Error::Conflict(_) => "conflict",
            Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
            "kind": self.inner.kind(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaforge_common::JobStatus;

    #[test]
    fn not_found_produces_404() {
        let response = AppError::new(Error::not_found("job", "abc")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn backpressure_produces_429() {
        let response = AppError::new(Error::Backpressure { capacity: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn terminal_cancel_produces_409() {
        let err = Error::already_terminal("abc", JobStatus::Succeeded);
        assert_eq!(AppError::from(err).into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn disk_full_produces_507() {
        let io = std::io::Error::from_raw_os_error(28);
        let response = AppError::new(Error::from(io)).into_response();
        assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
    }
}
