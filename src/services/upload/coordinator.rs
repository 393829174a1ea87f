//! Fans part transfers out in waves of at most `concurrency` parts.
//!
//! Every launched transfer in a wave is driven to completion before the
//! next wave starts, so a failure never leaves orphaned transfers behind.
//! Results are collected on the driving task itself; receipts are keyed by
//! part number and come out sorted regardless of completion order.

use std::collections::BTreeMap;

use futures::{StreamExt, stream::FuturesUnordered};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::upload::{PartReceipt, PartTarget};

use super::{PartUploader, ProgressGranularity, ProgressReporter, UploadError};

pub struct ConcurrencyCoordinator<'a> {
    uploader: PartUploader<'a>,
    concurrency: usize,
    granularity: ProgressGranularity,
}

impl<'a> ConcurrencyCoordinator<'a> {
    pub fn new(
        uploader: PartUploader<'a>,
        concurrency: usize,
        granularity: ProgressGranularity,
    ) -> Self {
        Self {
            uploader,
            concurrency: concurrency.max(1),
            granularity,
        }
    }

    /// Upload every target and return the receipts ordered by part number.
    ///
    /// Stops launching new waves after the first failure or once `cancel`
    /// fires, and reports the first error observed.
    pub async fn run(
        &self,
        targets: &BTreeMap<u32, PartTarget>,
        progress: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<PartReceipt>, UploadError> {
        let ordered: Vec<&PartTarget> = targets.values().collect();
        let mut receipts: BTreeMap<u32, PartReceipt> = BTreeMap::new();
        let mut first_error: Option<UploadError> = None;

        for (wave, batch) in ordered.chunks(self.concurrency).enumerate() {
            if cancel.is_cancelled() {
                first_error = Some(UploadError::Cancelled);
                break;
            }

            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|target| self.upload_one(target, cancel))
                .collect();

            while let Some(result) = in_flight.next().await {
                match result {
                    Ok(receipt) => {
                        let part_number = receipt.part_number;
                        if receipts.insert(part_number, receipt).is_some() {
                            first_error.get_or_insert(UploadError::ReceiptSetInvalid(format!(
                                "part {} was reported twice",
                                part_number
                            )));
                        }
                        if self.granularity == ProgressGranularity::PerPart {
                            progress.advance(receipts.len() as u32);
                        }
                    }
                    Err(UploadError::Cancelled) => {
                        first_error.get_or_insert(UploadError::Cancelled);
                    }
                    Err(err) => {
                        warn!(error = %err, wave, "part transfer failed");
                        first_error.get_or_insert(err);
                    }
                }
            }

            if first_error.is_some() {
                break;
            }
            if self.granularity == ProgressGranularity::Wave {
                progress.advance(receipts.len() as u32);
            }
            debug!(wave, parts = batch.len(), done = receipts.len(), "wave settled");
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(receipts.into_values().collect())
    }

    async fn upload_one(
        &self,
        target: &PartTarget,
        cancel: &CancellationToken,
    ) -> Result<PartReceipt, UploadError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = self.uploader.upload(target) => result,
        }
    }
}
