use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::message::Precedence;
use crate::routes::middleware::current_request_id;

pub type AppResult<T> = Result<T, AppError>;

/// Application error taxonomy.
///
/// Every variant maps to exactly one HTTP status and machine-readable code;
/// the response body is the standard envelope
/// `{"error": {"code", "message", "details", "request_id"}}`.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Authentication & Authorization =====
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("permission denied: {0}")]
    Forbidden(String),

    // ===== Validation =====
    #[error("validation error: {0}")]
    Validation(String),

    // ===== Lookup =====
    #[error("not found: {0}")]
    NotFound(String),

    // ===== Quotas & Backpressure =====
    #[error("rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: i64 },

    #[error("queue full for {precedence}")]
    QueueFull { precedence: Precedence },

    // ===== Crypto =====
    #[error("payload integrity verification failed")]
    Integrity,

    // ===== Downstream & Timing =====
    #[error("downstream unavailable: {0}")]
    Unavailable(String),

    #[error("request deadline exceeded")]
    Timeout,

    // ===== Internal =====
    #[error("internal error: {0}")]
    Internal(String),

    #[error("unexpected error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) | AppError::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::QueueFull { .. } | AppError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Integrity | AppError::Internal(_) | AppError::Unknown(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::InvalidToken { .. } => "INVALID_TOKEN",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::QueueFull { .. } => "QUEUE_FULL",
            AppError::Integrity => "INTEGRITY_ERROR",
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::Timeout => "GATEWAY_TIMEOUT",
            AppError::Internal(_) | AppError::Unknown(_) => "INTERNAL_ERROR",
        }
    }

    /// User-facing message. Server-side details are not leaked; in particular
    /// an integrity failure never carries plaintext or cipher internals.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(msg) => msg.clone(),
            AppError::InvalidToken { reason } => format!("invalid or expired token: {reason}"),
            AppError::Forbidden(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::RateLimited { message, .. } => message.clone(),
            AppError::QueueFull { precedence } => {
                format!("{precedence} partition is at its watermark, retry later")
            }
            AppError::Integrity => "message integrity verification failed".to_string(),
            AppError::Unavailable(msg) => msg.clone(),
            AppError::Timeout => "request deadline exceeded".to_string(),
            AppError::Internal(_) | AppError::Unknown(_) => "internal server error".to_string(),
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            AppError::RateLimited { retry_after_secs, .. } => {
                json!({ "retry_after_secs": retry_after_secs })
            }
            AppError::QueueFull { precedence } => json!({ "precedence": precedence }),
            _ => serde_json::Value::Null,
        }
    }

    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = %code, "request failed");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, error_code = %code, "authentication rejected");
        } else {
            tracing::debug!(error = %self, error_code = %code, "request rejected");
        }
    }

    // ===== Constructors =====

    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    pub fn invalid_token(reason: impl Into<String>) -> Self {
        AppError::InvalidToken { reason: reason.into() }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.user_message(),
                "details": self.details(),
                "request_id": current_request_id(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_mapping() {
        assert_eq!(
            AppError::invalid_token("expired").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::invalid_token("expired").error_code(), "INVALID_TOKEN");
        assert_eq!(
            AppError::QueueFull { precedence: Precedence::Flash }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(AppError::Integrity.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = AppError::internal("redis connection pool exhausted at 10.0.1.9");
        assert_eq!(err.user_message(), "internal server error");
    }
}
