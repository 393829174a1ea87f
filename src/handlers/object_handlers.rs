//! HTTP handlers for `/{bucket}/{*key}`.
//! Plain object requests stream bodies straight to `StorageService`;
//! requests carrying multipart query parameters go to `multipart_handlers`.

use crate::{
    errors::AppError,
    handlers::multipart_handlers,
    models::object::Object,
    services::storage_service::StorageService,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Multipart query parameters recognised on object paths.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    /// Present (usually empty) on session creation: `?uploads`.
    pub uploads: Option<String>,
    /// Present (usually empty) on target issuance: `?targets&uploadId=…`.
    pub targets: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<i32>,
}

/// `PUT /{bucket}/{*key}`: upload an object, or a part when
/// `partNumber` and `uploadId` are given.
pub async fn put_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    match (q.upload_id.as_deref(), q.part_number) {
        (Some(upload_id), Some(part_number)) => {
            return multipart_handlers::upload_part(
                &service, &bucket, &key, upload_id, part_number, &headers, body,
            )
            .await;
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(AppError::bad_request(
                "part uploads need both partNumber and uploadId",
            ));
        }
        (None, None) => {}
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = service
        .upload_object_stream(&bucket, &key, content_type, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    if let Some(etag) = object.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

/// `POST /{bucket}/{*key}`: multipart session control.
pub async fn post_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    match (&q.uploads, &q.targets, q.upload_id.as_deref()) {
        (Some(_), _, None) => {
            multipart_handlers::create_upload(&service, &bucket, &key, &headers).await
        }
        (None, Some(_), Some(upload_id)) => {
            multipart_handlers::issue_targets(&service, &bucket, &key, upload_id, &body).await
        }
        (None, None, Some(upload_id)) => {
            multipart_handlers::complete_upload(&service, &bucket, &key, upload_id, &body).await
        }
        _ => Err(AppError::bad_request(
            "expected `?uploads`, `?targets&uploadId=…` or `?uploadId=…`",
        )),
    }
}

/// Download an object `/{bucket}/{*key}` as a streaming response.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = service.get_object_reader(&bucket, &key).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = service.get_object_metadata(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/{bucket}/{*key}`: soft-delete the object, or abort the
/// session named by `uploadId`.
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
) -> Result<Response, AppError> {
    if let Some(upload_id) = q.upload_id.as_deref() {
        return multipart_handlers::abort_upload(&service, &bucket, &key, upload_id).await;
    }

    service.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
