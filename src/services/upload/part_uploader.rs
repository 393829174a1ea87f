//! Transfers a single part and turns the response into a [`PartReceipt`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::upload::{PartReceipt, PartTarget};

use super::{PartPlan, PartSource, StorageBackend, UploadError};

/// Bounded retry for failed part transfers. Zero retries by default.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

pub struct PartUploader<'a> {
    backend: &'a dyn StorageBackend,
    source: &'a dyn PartSource,
    plan: PartPlan,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl<'a> PartUploader<'a> {
    pub fn new(
        backend: &'a dyn StorageBackend,
        source: &'a dyn PartSource,
        plan: PartPlan,
    ) -> Self {
        Self {
            backend,
            source,
            plan,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upload the part addressed by `target`, retrying per the policy.
    pub async fn upload(&self, target: &PartTarget) -> Result<PartReceipt, UploadError> {
        let mut attempt = 0;
        loop {
            match self.attempt(target).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        part_number = target.part_number,
                        attempt,
                        error = %err,
                        "part upload failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, target: &PartTarget) -> Result<PartReceipt, UploadError> {
        let part_number = target.part_number;
        let fail = |cause: String| UploadError::PartUploadFailed { part_number, cause };

        let (offset, len) = self
            .plan
            .part_range(part_number)
            .ok_or_else(|| fail("part number is outside the upload plan".into()))?;
        let body = self
            .source
            .read_range(offset, len)
            .await
            .map_err(|err| fail(format!("reading source: {}", err)))?;
        if body.len() as u64 != len {
            return Err(fail(format!(
                "source returned {} bytes, expected {}",
                body.len(),
                len
            )));
        }

        let transfer = self.backend.upload_part(target, body);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, transfer)
                .await
                .map_err(|_| fail(format!("timed out after {:?}", limit)))?,
            None => transfer.await,
        };
        let token = response.map_err(|err| fail(err.to_string()))?;

        let etag = token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| fail("response carried no integrity token".into()))?;

        debug!(part_number, bytes = len, etag = %etag, "part stored");
        Ok(PartReceipt { part_number, etag })
    }
}
