//! Upload pipeline error types.

use std::fmt;

use thiserror::Error;

use crate::services::storage_service::StorageError;

/// What a [`StorageBackend`](super::StorageBackend) reports when a call fails.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors produced while driving one upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("invalid upload configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot plan parts: {0}")]
    InvalidPlan(String),

    #[error("failed to create upload session: {0}")]
    SessionCreateFailed(#[source] BackendError),

    #[error("incomplete part target set: {0}")]
    IncompleteTargetSet(String),

    #[error("part {part_number} failed: {cause}")]
    PartUploadFailed { part_number: u32, cause: String },

    #[error("receipt set invalid: {0}")]
    ReceiptSetInvalid(String),

    #[error("failed to finalize upload session: {0}")]
    FinalizationFailed(#[source] BackendError),

    #[error("failed to abort upload session: {0}")]
    AbortFailed(#[source] BackendError),

    #[error("cancelled")]
    Cancelled,
}

/// A failed upload: the error that stopped the pipeline, plus the outcome of
/// the cleanup abort when one was attempted and failed.
#[derive(Debug)]
pub struct UploadFailure {
    pub primary: UploadError,
    pub abort: Option<UploadError>,
}

impl UploadFailure {
    pub fn new(primary: UploadError) -> Self {
        Self {
            primary,
            abort: None,
        }
    }
}

impl From<UploadError> for UploadFailure {
    fn from(primary: UploadError) -> Self {
        Self::new(primary)
    }
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if let Some(abort) = &self.abort {
            write!(f, " (cleanup also failed: {})", abort)?;
        }
        Ok(())
    }
}

impl std::error::Error for UploadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}
