//! Terminal transitions of an upload session: complete or abort.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::upload::{CompletedObject, PartReceipt, UploadSession};

use super::{StorageBackend, UploadError, UploadFailure};

/// Check receipts are exactly parts `1..=part_count`, strictly ascending,
/// each carrying a token.
pub fn validate_receipts(receipts: &[PartReceipt], part_count: u32) -> Result<(), UploadError> {
    if receipts.len() as u32 != part_count {
        return Err(UploadError::ReceiptSetInvalid(format!(
            "expected {} receipts, have {}",
            part_count,
            receipts.len()
        )));
    }
    for (idx, receipt) in receipts.iter().enumerate() {
        let expected = idx as u32 + 1;
        if receipt.part_number != expected {
            return Err(UploadError::ReceiptSetInvalid(format!(
                "receipt at position {} is for part {}, expected part {}",
                idx, receipt.part_number, expected
            )));
        }
        if receipt.etag.trim().is_empty() {
            return Err(UploadError::ReceiptSetInvalid(format!(
                "receipt for part {} has no etag",
                receipt.part_number
            )));
        }
    }
    Ok(())
}

pub struct SessionFinalizer<'a> {
    backend: &'a dyn StorageBackend,
}

impl<'a> SessionFinalizer<'a> {
    pub fn new(backend: &'a dyn StorageBackend) -> Self {
        Self { backend }
    }

    /// Submit the ordered receipts. Never retried and never interrupted once
    /// sent; cancellation is only honoured before submission.
    pub async fn complete(
        &self,
        session: &UploadSession,
        receipts: &[PartReceipt],
        cancel: &CancellationToken,
    ) -> Result<CompletedObject, UploadError> {
        validate_receipts(receipts, session.part_count())?;
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let completed = self
            .backend
            .complete_session(&session.session_id, &session.key, receipts)
            .await
            .map_err(UploadError::FinalizationFailed)?;

        info!(
            key = %session.key,
            session_id = %session.session_id,
            location = %completed.location,
            "upload session completed"
        );
        Ok(completed)
    }

    pub async fn abort(&self, session: &UploadSession) -> Result<(), UploadError> {
        self.backend
            .abort_session(&session.session_id, &session.key)
            .await
            .map_err(UploadError::AbortFailed)
    }

    /// Best-effort abort after `primary` stopped the pipeline. A failed
    /// abort is attached to the result, never substituted for `primary`.
    pub async fn abort_after(&self, session: &UploadSession, primary: UploadError) -> UploadFailure {
        match &primary {
            UploadError::FinalizationFailed(_) => {
                error!(key = %session.key, session_id = %session.session_id, error = %primary, "finalization failed")
            }
            _ => {
                warn!(key = %session.key, session_id = %session.session_id, error = %primary, "upload failed")
            }
        }

        match self.abort(session).await {
            Ok(()) => {
                info!(session_id = %session.session_id, "upload session aborted");
                UploadFailure::new(primary)
            }
            Err(abort) => {
                warn!(session_id = %session.session_id, error = %abort, "abort after failure also failed");
                UploadFailure {
                    primary,
                    abort: Some(abort),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipts(parts: &[u32]) -> Vec<PartReceipt> {
        parts
            .iter()
            .map(|&part_number| PartReceipt {
                part_number,
                etag: format!("\"etag-{}\"", part_number),
            })
            .collect()
    }

    #[test]
    fn accepts_contiguous_ascending_receipts() {
        assert!(validate_receipts(&receipts(&[1, 2, 3]), 3).is_ok());
    }

    #[test]
    fn rejects_gaps_duplicates_and_disorder() {
        let cases: [&[u32]; 4] = [&[1, 3], &[1, 1], &[2, 1], &[1, 2, 3]];
        for bad in cases {
            assert!(
                matches!(
                    validate_receipts(&receipts(bad), 2),
                    Err(UploadError::ReceiptSetInvalid(_))
                ),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn rejects_blank_etags() {
        let mut set = receipts(&[1, 2]);
        set[1].etag = " ".into();
        assert!(matches!(
            validate_receipts(&set, 2),
            Err(UploadError::ReceiptSetInvalid(_))
        ));
    }
}
