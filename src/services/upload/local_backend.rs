//! [`StorageBackend`] over the bundled [`StorageService`], in process.

use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{
    models::{
        multipart::{CompletedPart, object_url, parse_part_target_url, part_target_url},
        upload::{CompletedObject, PartReceipt, PartTarget},
    },
    services::storage_service::StorageService,
};

use super::{BackendError, BackendResult, SessionMetadata, StorageBackend};

/// Writes into one bucket of a local [`StorageService`]. Target URLs and
/// object locations are rendered against `public_url`, the address the HTTP
/// surface is reachable at.
#[derive(Clone)]
pub struct LocalBackend {
    storage: StorageService,
    bucket: String,
    public_url: String,
}

impl LocalBackend {
    pub fn new(
        storage: StorageService,
        bucket: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn location(&self, key: &str) -> String {
        object_url(&self.public_url, &self.bucket, key)
    }
}

impl StorageBackend for LocalBackend {
    fn create_session<'a>(
        &'a self,
        key: &'a str,
        content_type: &'a str,
        metadata: &'a SessionMetadata,
    ) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            let upload = self
                .storage
                .create_multipart_upload(
                    &self.bucket,
                    key,
                    Some(content_type.to_string()),
                    Some(metadata.original_name.clone()),
                )
                .await?;
            Ok(upload.upload_id)
        })
    }

    fn issue_part_targets<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
        part_numbers: &'a [u32],
    ) -> BoxFuture<'a, BackendResult<Vec<PartTarget>>> {
        Box::pin(async move {
            self.storage
                .get_multipart_upload(&self.bucket, key, session_id)
                .await?;
            Ok(part_numbers
                .iter()
                .map(|&part_number| PartTarget {
                    part_number,
                    url: part_target_url(&self.public_url, &self.bucket, key, session_id, part_number),
                })
                .collect())
        })
    }

    fn upload_part<'a>(
        &'a self,
        target: &'a PartTarget,
        body: Bytes,
    ) -> BoxFuture<'a, BackendResult<Option<String>>> {
        Box::pin(async move {
            let (upload_id, part_number) = parse_part_target_url(&target.url)
                .filter(|(_, n)| *n == target.part_number)
                .ok_or_else(|| {
                    BackendError::Transport(format!("malformed part target `{}`", target.url))
                })?;
            let part_number = i32::try_from(part_number)
                .map_err(|_| BackendError::Transport(format!("part number {} out of range", part_number)))?;

            let content_md5 = md5::compute(&body).0;
            let stream = futures::stream::once(async move { Ok::<_, io::Error>(body) });
            let part = self
                .storage
                .upload_part(&upload_id, part_number, Some(content_md5), stream)
                .await?;
            Ok(Some(format!("\"{}\"", part.etag)))
        })
    }

    fn complete_session<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
        receipts: &'a [PartReceipt],
    ) -> BoxFuture<'a, BackendResult<CompletedObject>> {
        Box::pin(async move {
            let parts = receipts
                .iter()
                .map(|receipt| {
                    Ok(CompletedPart {
                        part_number: i32::try_from(receipt.part_number).map_err(|_| {
                            BackendError::Transport(format!(
                                "part number {} out of range",
                                receipt.part_number
                            ))
                        })?,
                        etag: receipt.etag.clone(),
                    })
                })
                .collect::<BackendResult<Vec<_>>>()?;

            let object = self
                .storage
                .complete_multipart_upload(&self.bucket, key, session_id, &parts)
                .await?;
            Ok(CompletedObject {
                location: self.location(key),
                etag: object.etag.unwrap_or_default(),
            })
        })
    }

    fn abort_session<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.storage
                .abort_multipart_upload(&self.bucket, key, session_id)
                .await?;
            Ok(())
        })
    }
}
