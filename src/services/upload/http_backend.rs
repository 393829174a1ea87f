//! [`StorageBackend`] speaking to a remote object-upload server over HTTP.
//!
//! Uses the session endpoints served under `/{bucket}/{*key}`; part bodies
//! are PUT straight to the issued target URLs.

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::{
    Response,
    header::{CONTENT_TYPE, ETAG, HeaderValue},
};

use crate::{
    handlers::multipart_handlers::{
        CompleteUploadRequest, CompleteUploadResponse, CreateUploadResponse, IssueTargetsRequest,
        IssueTargetsResponse, ORIGINAL_NAME_HEADER,
    },
    models::{
        multipart::{CompletedPart, object_url},
        upload::{CompletedObject, PartReceipt, PartTarget},
    },
};

use super::{BackendError, BackendResult, SessionMetadata, StorageBackend};

/// Client for one bucket on a server reachable at `base_url`.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("object-upload/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        object_url(&self.base_url, &self.bucket, key)
    }

    /// Host-relative URLs from the server are resolved against `base_url`.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            url.to_string()
        }
    }
}

/// Turn a non-2xx response into [`BackendError::Status`] with its body.
async fn check(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

impl StorageBackend for HttpBackend {
    fn create_session<'a>(
        &'a self,
        key: &'a str,
        content_type: &'a str,
        metadata: &'a SessionMetadata,
    ) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            let mut request = self
                .http
                .post(self.object_url(key))
                .query(&[("uploads", "")])
                .header(CONTENT_TYPE, content_type);
            // Names that are not valid header text are left to the server's default.
            if let Ok(name) = HeaderValue::from_str(&metadata.original_name) {
                request = request.header(ORIGINAL_NAME_HEADER, name);
            }

            let response = check(request.send().await?).await?;
            let created: CreateUploadResponse = response.json().await?;
            Ok(created.upload_id)
        })
    }

    fn issue_part_targets<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
        part_numbers: &'a [u32],
    ) -> BoxFuture<'a, BackendResult<Vec<PartTarget>>> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.object_url(key))
                .query(&[("targets", ""), ("uploadId", session_id)])
                .json(&IssueTargetsRequest {
                    part_numbers: part_numbers.to_vec(),
                })
                .send()
                .await?;
            let issued: IssueTargetsResponse = check(response).await?.json().await?;

            Ok(issued
                .targets
                .into_iter()
                .map(|target| PartTarget {
                    part_number: target.part_number,
                    url: self.absolute(&target.url),
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
            let content_md5 = general_purpose::STANDARD.encode(md5::compute(&body).0);
            let response = self
                .http
                .put(&target.url)
                .header("content-md5", content_md5)
                .body(body)
                .send()
                .await?;
            let response = check(response).await?;

            Ok(response
                .headers()
                .get(ETAG)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string))
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

            let response = self
                .http
                .post(self.object_url(key))
                .query(&[("uploadId", session_id)])
                .json(&CompleteUploadRequest { parts })
                .send()
                .await?;
            let completed: CompleteUploadResponse = check(response).await?.json().await?;

            Ok(CompletedObject {
                location: self.absolute(&completed.location),
                etag: completed.etag,
            })
        })
    }

    fn abort_session<'a>(
        &'a self,
        session_id: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let response = self
                .http
                .delete(self.object_url(key))
                .query(&[("uploadId", session_id)])
                .send()
                .await?;
            check(response).await?;
            Ok(())
        })
    }
}
