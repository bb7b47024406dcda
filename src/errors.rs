use crate::services::StorageError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// HTTP error envelope: `{ error, status, code?, s3Code?, details? }`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,

    /// Machine-readable code for errors the UI reacts to specifically.
    pub code: Option<&'static str>,

    /// Error code reported by the S3-compatible backend.
    pub s3_code: Option<String>,

    pub details: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            code: None,
            s3_code: None,
            details: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }
        if let Some(s3_code) = self.s3_code {
            body["s3Code"] = json!(s3_code);
        }
        if let Some(details) = self.details {
            body["details"] = details;
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::NoActiveConnection => AppError {
                code: Some("NO_ACTIVE_CONNECTION"),
                ..AppError::new(StatusCode::PRECONDITION_REQUIRED, message)
            },
            StorageError::InvalidInput(_) => AppError::bad_request(message),
            StorageError::Backend { status, code, .. }
            | StorageError::MultipartPartFailed { status, code, .. } => AppError {
                s3_code: code,
                ..AppError::new(backend_status(status), message)
            },
            StorageError::MultipartInitFailed(_) => AppError::internal(message),
            StorageError::PartialFailure { succeeded, failed } => AppError {
                details: Some(json!({ "succeeded": succeeded, "failed": failed })),
                ..AppError::internal(message)
            },
            StorageError::ConnectionNotFound(_) => AppError::not_found(message),
            StorageError::DuplicateConnectionName(_) => {
                AppError::new(StatusCode::CONFLICT, message)
            }
            StorageError::Crypto(_) => AppError::internal(message),
            StorageError::Sqlx(err) => {
                tracing::error!(error = %err, "database error");
                AppError::internal("database error")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

/// Backend status when it is an error status, else 500.
fn backend_status(status: Option<u16>) -> StatusCode {
    status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::FailedKey;

    #[test]
    fn no_active_connection_is_precondition_required() {
        let err = AppError::from(StorageError::NoActiveConnection);
        assert_eq!(err.status, StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(err.code, Some("NO_ACTIVE_CONNECTION"));
    }

    #[test]
    fn backend_status_and_code_pass_through() {
        let err = AppError::from(StorageError::Backend {
            status: Some(403),
            code: Some("AccessDenied".into()),
            message: "Access Denied".into(),
        });
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.s3_code.as_deref(), Some("AccessDenied"));

        let err = AppError::from(StorageError::backend("connection reset"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn part_failure_keeps_backend_status() {
        let err = AppError::from(StorageError::MultipartPartFailed {
            part_number: 3,
            status: Some(403),
            code: Some("AccessDenied".into()),
            message: "Access Denied".into(),
        });
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.s3_code.as_deref(), Some("AccessDenied"));
    }

    #[test]
    fn partial_failure_carries_details() {
        let err = AppError::from(StorageError::PartialFailure {
            succeeded: vec!["a".into()],
            failed: vec![FailedKey {
                key: "b".into(),
                error: "denied".into(),
                code: None,
            }],
        });
        let details = err.details.unwrap();
        assert_eq!(details["succeeded"], json!(["a"]));
        assert_eq!(details["failed"][0]["key"], json!("b"));
    }
}
