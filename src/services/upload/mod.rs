//! Client-side multipart upload pipeline.
//!
//! `upload_file` drives one file through:
//! key resolution → part planning → session creation → target issuance →
//! wave-bounded part transfers → complete, or abort on any failure.

mod backend;
mod coordinator;
mod error;
mod finalizer;
mod http_backend;
mod local_backend;
mod part_planner;
mod part_uploader;
mod path_resolver;
mod progress;
mod session;
mod source;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use backend::{BackendResult, SessionMetadata, StorageBackend};
pub use coordinator::ConcurrencyCoordinator;
pub use error::{BackendError, UploadError, UploadFailure};
pub use finalizer::{SessionFinalizer, validate_receipts};
pub use http_backend::HttpBackend;
pub use local_backend::LocalBackend;
pub use part_planner::{
    DEFAULT_PART_SIZE, MAX_PART_COUNT, MAX_PART_SIZE, MIB, MIN_PART_SIZE, PartPlan,
    PartSizePolicy, plan_parts,
};
pub use part_uploader::{PartUploader, RetryPolicy};
pub use path_resolver::resolve_key;
pub use progress::{NoProgress, ProgressGranularity, ProgressObserver, ProgressReporter};
pub use session::{issue_targets, open_session, validate_targets};
pub use source::{FileSource, PartSource};

use crate::{
    config::UploadConfig,
    models::upload::{CompletedObject, UploadOutcome, UploadRequest, UploadSession},
};

/// Caller-facing entry point. Cheap to clone; every `upload_file` call owns
/// its own session and shares nothing mutable with concurrent calls.
#[derive(Clone)]
pub struct UploadService {
    backend: Arc<dyn StorageBackend>,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(backend: Arc<dyn StorageBackend>, config: UploadConfig) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    /// Upload `source` as described by `request`.
    ///
    /// Exactly one terminal backend call is made per opened session:
    /// complete on success, abort on any failure after the session exists.
    /// `observer` sees `pending`, then `uploading` snapshots, then one
    /// terminal snapshot, all delivered before this returns.
    pub async fn upload_file(
        &self,
        request: &UploadRequest,
        source: &dyn PartSource,
        observer: impl ProgressObserver,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, UploadFailure> {
        let mut progress = ProgressReporter::spawn(request.file_name.clone(), observer);
        let result = self.run(request, source, &mut progress, &cancel).await;
        match &result {
            Ok(_) => progress.complete(),
            Err(_) => progress.fail(),
        }
        progress.finish().await;
        result
    }

    async fn run(
        &self,
        request: &UploadRequest,
        source: &dyn PartSource,
        progress: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadFailure> {
        request.validate()?;
        let key = resolve_key(
            request.folder.as_deref(),
            request.relative_path.as_deref(),
            &request.file_name,
            &request.scope,
        )?;
        let plan = plan_parts(request.size, &self.config.part_sizes)?;

        let backend = self.backend.as_ref();
        let session = open_session(backend, &key, request, plan, cancel).await?;
        let finalizer = SessionFinalizer::new(backend);

        match self
            .transfer(&session, source, &finalizer, progress, cancel)
            .await
        {
            Ok(completed) => {
                info!(key = %session.key, parts = session.part_count(), "upload finished");
                Ok(UploadOutcome {
                    key: session.key,
                    location: completed.location,
                    etag: completed.etag,
                    part_count: session.plan.part_count,
                })
            }
            Err(primary) => Err(finalizer.abort_after(&session, primary).await),
        }
    }

    async fn transfer(
        &self,
        session: &UploadSession,
        source: &dyn PartSource,
        finalizer: &SessionFinalizer<'_>,
        progress: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<CompletedObject, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let backend = self.backend.as_ref();
        let targets = issue_targets(backend, session, cancel).await?;
        progress.start(session.part_count());

        let uploader = PartUploader::new(backend, source, session.plan)
            .with_timeout(self.config.part_timeout)
            .with_retry(self.config.retry);
        let coordinator =
            ConcurrencyCoordinator::new(uploader, self.config.concurrency, self.config.granularity);
        let receipts = coordinator.run(&targets, progress, cancel).await?;

        finalizer.complete(session, &receipts, cancel).await
    }
}
