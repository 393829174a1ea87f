use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::storage_service::StorageError;

/// HTTP-facing error: a status code and a message rendered as JSON.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::BucketNotFound(_)
            | StorageError::ObjectNotFound { .. }
            | StorageError::UploadNotFound(_) => Self::not_found(message),
            StorageError::BucketAlreadyExists(_) => Self::new(StatusCode::CONFLICT, message),
            StorageError::InvalidBucketName { .. }
            | StorageError::InvalidObjectKey
            | StorageError::InvalidPartNumber(_)
            | StorageError::InvalidPart { .. }
            | StorageError::InvalidPartOrder
            | StorageError::EntityTooSmall { .. }
            | StorageError::BadDigest { .. } => Self::bad_request(message),
            StorageError::Sqlx(_) | StorageError::Io(_) => {
                tracing::error!("storage failure: {}", message);
                Self::internal("internal storage error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        let err: AppError = StorageError::UploadNotFound("u1".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: AppError = StorageError::InvalidPartOrder.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError = StorageError::BadDigest { part_number: 2 }.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError =
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("disk"));
    }
}
