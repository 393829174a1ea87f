//! The object-storage contract the upload pipeline drives.
//!
//! Implementations are injected into [`UploadService`](super::UploadService)
//! so the pipeline can run against the bundled local store, a remote
//! service, or an instrumented fake in tests.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::models::upload::{CompletedObject, PartReceipt, PartTarget};

use super::BackendError;

pub type BackendResult<T> = Result<T, BackendError>;

/// Metadata attached to a session when it is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionMetadata {
    pub original_name: String,
    pub declared_size: u64,
}

/// Backend operations needed for one multipart transfer.
pub trait StorageBackend: Send + Sync {
    /// Opens a session for `key` and returns its id.
    fn create_session<'a>(
        &'a self,
        key: &'a str,
        content_type: &'a str,
        metadata: &'a SessionMetadata,
    ) -> BoxFuture<'a, BackendResult<String>>;

    /// Returns one upload target per requested part number.
    fn issue_part_targets<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
        part_numbers: &'a [u32],
    ) -> BoxFuture<'a, BackendResult<Vec<PartTarget>>>;

    /// Sends one part body. Resolves to the integrity token from the
    /// response, or `None` when the response carried none.
    fn upload_part<'a>(
        &'a self,
        target: &'a PartTarget,
        body: Bytes,
    ) -> BoxFuture<'a, BackendResult<Option<String>>>;

    /// Assembles the session from receipts sorted by part number.
    fn complete_session<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
        receipts: &'a [PartReceipt],
    ) -> BoxFuture<'a, BackendResult<CompletedObject>>;

    fn abort_session<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>>;
}
