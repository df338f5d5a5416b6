use crate::services::{
    backend::BackendError, error::StorageError, link_signer::LinkError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "request failed");
        AppError::internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            StorageError::NamespaceNotFound(_) => StatusCode::NOT_FOUND,
            StorageError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            StorageError::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            other => match other.backend_source() {
                Some(source) if source.is_not_found() => StatusCode::NOT_FOUND,
                Some(BackendError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if err.is_interrupted() {
            tracing::warn!(error = %err, "storage operation interrupted");
        } else if status.is_server_error() {
            tracing::error!(error = ?err, "storage operation failed");
        }
        AppError::new(status, err.to_string())
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(key) => AppError::not_found(format!("object `{}` not found", key)),
            BackendError::InvalidKey(_) => AppError::bad_request(err.to_string()),
            BackendError::Link(LinkError::Expired) => {
                AppError::new(StatusCode::GONE, LinkError::Expired.to_string())
            }
            BackendError::Link(link) => AppError::new(StatusCode::FORBIDDEN, link.to_string()),
            other => {
                tracing::error!(error = ?other, "object store failure");
                AppError::internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn status_of(err: StorageError) -> StatusCode {
        AppError::from(err).status
    }

    #[test]
    fn storage_errors_map_to_statuses() {
        assert_eq!(
            status_of(StorageError::InvalidIdentity("".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StorageError::NamespaceNotFound("a@example.com".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StorageError::DeadlineExceeded),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(StorageError::Canceled),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StorageError::CopyFailed {
                from: "a".into(),
                to: "b".into(),
                source: BackendError::NotFound("a".into()),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StorageError::UploadFailed {
                key: "a".into(),
                source: BackendError::Io(io::Error::other("disk full")),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rejected_keys_are_client_errors() {
        assert_eq!(
            status_of(StorageError::DeleteFailed {
                key: "a@example.com/files/..".into(),
                source: BackendError::InvalidKey("a@example.com/files/..".into()),
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StorageError::MoveDeleteFailed {
                from: "a".into(),
                to: "b".into(),
                source: Box::new(StorageError::DeleteFailed {
                    key: "a".into(),
                    source: BackendError::InvalidKey("a".into()),
                }),
            }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn link_failures_are_client_errors() {
        assert_eq!(
            AppError::from(BackendError::Link(LinkError::BadSignature)).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(BackendError::Link(LinkError::Expired)).status,
            StatusCode::GONE
        );
    }
}
