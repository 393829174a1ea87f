//! Multipart session endpoints. Dispatched from the object routes by query
//! string (`?uploads`, `?uploadId=…`, `?partNumber=…&uploadId=…`), the way
//! S3 overloads object paths.

use crate::{
    errors::AppError,
    models::{
        multipart::{CompletedPart, MAX_PART_NUMBER, object_url, part_target_url},
        upload::PartTarget,
    },
    services::storage_service::StorageService,
};
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

/// Header carrying the client's original file name at session creation.
pub const ORIGINAL_NAME_HEADER: &str = "x-amz-meta-original-name";

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUploadResponse {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTargetsRequest {
    pub part_numbers: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTargetsResponse {
    pub upload_id: String,
    pub targets: Vec<PartTarget>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

/// `POST /{bucket}/{*key}?uploads`
pub async fn create_upload(
    service: &StorageService,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str());
    let filename = header_str(headers, ORIGINAL_NAME_HEADER);

    let upload = service
        .create_multipart_upload(bucket, key, content_type, filename)
        .await?;

    Ok(Json(CreateUploadResponse {
        bucket: bucket.to_string(),
        key: upload.key,
        upload_id: upload.upload_id,
    })
    .into_response())
}

/// `POST /{bucket}/{*key}?targets&uploadId=…` with `{"part_numbers": [..]}`.
/// Targets are relative to this server.
pub async fn issue_targets(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &[u8],
) -> Result<Response, AppError> {
    let req: IssueTargetsRequest = parse_json(body)?;
    if let Some(bad) = req
        .part_numbers
        .iter()
        .find(|&&n| n == 0 || n > MAX_PART_NUMBER as u32)
    {
        return Err(AppError::bad_request(format!(
            "part number {} is outside 1..={}",
            bad, MAX_PART_NUMBER
        )));
    }

    service.get_multipart_upload(bucket, key, upload_id).await?;
    let targets = req
        .part_numbers
        .iter()
        .map(|&part_number| PartTarget {
            part_number,
            url: part_target_url("", bucket, key, upload_id, part_number),
        })
        .collect();

    Ok(Json(IssueTargetsResponse {
        upload_id: upload_id.to_string(),
        targets,
    })
    .into_response())
}

/// `PUT /{bucket}/{*key}?partNumber=N&uploadId=…`: responds with the part ETag.
pub async fn upload_part(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: i32,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_md5 = match header_str(headers, "content-md5") {
        Some(value) => Some(decode_content_md5(&value)?),
        None => None,
    };

    service.get_multipart_upload(bucket, key, upload_id).await?;
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let part = service
        .upload_part(upload_id, part_number, content_md5, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    let etag = format!("\"{}\"", part.etag);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `POST /{bucket}/{*key}?uploadId=…` with `{"parts": [{"part_number", "etag"}]}`.
pub async fn complete_upload(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &[u8],
) -> Result<Response, AppError> {
    let req: CompleteUploadRequest = parse_json(body)?;
    let object = service
        .complete_multipart_upload(bucket, key, upload_id, &req.parts)
        .await?;

    Ok(Json(CompleteUploadResponse {
        location: object_url("", bucket, key),
        bucket: bucket.to_string(),
        key: object.key,
        etag: object.etag.unwrap_or_default(),
    })
    .into_response())
}

/// `DELETE /{bucket}/{*key}?uploadId=…`
pub async fn abort_upload(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Response, AppError> {
    service.abort_multipart_upload(bucket, key, upload_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn decode_content_md5(value: &str) -> Result<[u8; 16], AppError> {
    general_purpose::STANDARD
        .decode(value)
        .ok()
        .and_then(|bytes| <[u8; 16]>::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| AppError::bad_request("Content-MD5 must be a base64 encoded 16 byte digest"))
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| AppError::bad_request(format!("invalid JSON body: {}", err)))
}
