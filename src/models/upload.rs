//! Data model of a single client-side multipart transfer.
//!
//! None of these types are persisted: an [`UploadSession`] lives exactly as
//! long as the `upload_file` call that opened it.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::upload::{PartPlan, UploadError};

/// Content type used when the caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// How keys are placed inside the storage scope.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeMode {
    /// The caller writes anywhere in the bucket.
    WholeScope,
    /// Every key is prefixed with `{scope}/`.
    #[default]
    Namespaced,
}

impl FromStr for ScopeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whole-scope" | "whole" | "bucket" => Ok(Self::WholeScope),
            "namespaced" | "namespace" | "tenant" => Ok(Self::Namespaced),
            other => Err(format!(
                "unknown scope mode `{}` (expected `whole-scope` or `namespaced`)",
                other
            )),
        }
    }
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WholeScope => f.write_str("whole-scope"),
            Self::Namespaced => f.write_str("namespaced"),
        }
    }
}

/// The logical namespace a caller may write into, as handed over by the
/// identity provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct StorageScope {
    pub mode: ScopeMode,
    /// Tenant folder; ignored in whole-scope mode.
    pub id: String,
}

impl StorageScope {
    pub fn whole() -> Self {
        Self {
            mode: ScopeMode::WholeScope,
            id: String::new(),
        }
    }

    pub fn namespaced(id: impl Into<String>) -> Self {
        Self {
            mode: ScopeMode::Namespaced,
            id: id.into(),
        }
    }
}

/// Immutable description of one file to transfer.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadRequest {
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
    pub folder: Option<String>,
    /// Path inside a batch/folder upload, e.g. `photos/2024/img.jpg`.
    pub relative_path: Option<String>,
    pub scope: StorageScope,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, size: u64, scope: StorageScope) -> Self {
        Self {
            file_name: file_name.into(),
            size,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            folder: None,
            relative_path: None,
            scope,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        if !content_type.trim().is_empty() {
            self.content_type = content_type;
        }
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    /// Boundary validation, run before any key resolution or remote call.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.file_name.trim().is_empty() {
            return Err(UploadError::InvalidRequest("file name is empty".into()));
        }
        if self.size == 0 {
            return Err(UploadError::InvalidRequest(format!(
                "`{}` is empty; multipart uploads need at least one byte",
                self.file_name
            )));
        }
        Ok(())
    }
}

/// One in-flight transfer, from session creation until complete or abort.
#[derive(Clone, Debug)]
pub struct UploadSession {
    /// Backend-issued session id.
    pub session_id: String,
    pub key: String,
    pub plan: PartPlan,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn part_count(&self) -> u32 {
        self.plan.part_count
    }
}

/// Where a single part is sent; only valid while its session is open.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartTarget {
    pub part_number: u32,
    pub url: String,
}

/// Proof that a part was stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartReceipt {
    pub part_number: u32,
    /// Backend integrity token, treated as an opaque ETag.
    pub etag: String,
}

/// What the backend reports after assembling a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedObject {
    pub location: String,
    pub etag: String,
}

/// Successful result of `upload_file`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub key: String,
    pub location: String,
    pub etag: String,
    pub part_count: u32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Snapshot delivered to progress observers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadProgress {
    pub file_name: String,
    pub completed_parts: u32,
    pub total_parts: u32,
    pub percentage: f64,
    pub status: UploadStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_mode_parses_aliases() {
        assert_eq!("whole-scope".parse::<ScopeMode>(), Ok(ScopeMode::WholeScope));
        assert_eq!("Namespaced".parse::<ScopeMode>(), Ok(ScopeMode::Namespaced));
        assert!("global".parse::<ScopeMode>().is_err());
    }

    #[test]
    fn request_validation() {
        let scope = StorageScope::whole();
        assert!(UploadRequest::new("a.bin", 1, scope.clone()).validate().is_ok());
        assert!(matches!(
            UploadRequest::new("", 10, scope.clone()).validate(),
            Err(UploadError::InvalidRequest(_))
        ));
        assert!(matches!(
            UploadRequest::new("a.bin", 0, scope).validate(),
            Err(UploadError::InvalidRequest(_))
        ));
    }

    #[test]
    fn blank_content_type_keeps_default() {
        let req = UploadRequest::new("a.bin", 1, StorageScope::whole()).with_content_type("  ");
        assert_eq!(req.content_type, DEFAULT_CONTENT_TYPE);
        let req = req.with_content_type("application/pdf");
        assert_eq!(req.content_type, "application/pdf");
    }
}
