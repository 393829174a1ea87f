//! Object, multipart session and health endpoints, driven through the handlers.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use object_upload::{
    db,
    handlers::{
        health_handlers::{healthz, readyz},
        multipart_handlers::{CreateUploadResponse, IssueTargetsResponse, ORIGINAL_NAME_HEADER},
        object_handlers::{
            ObjectQuery, delete_object, get_object, head_object, post_object, put_object,
        },
    },
    services::storage_service::StorageService,
};
use serde_json::{Value, json};

const BUCKET: &str = "uploads";
const KEY: &str = "alice/notes.txt";

async fn service(dir: &std::path::Path) -> StorageService {
    let url = format!("sqlite://{}", dir.join("meta.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let storage = StorageService::new(Arc::new(pool), dir.join("objects")).with_min_part_size(4);
    storage.ensure_bucket(BUCKET).await.unwrap();
    storage
}

fn path() -> Path<(String, String)> {
    Path((BUCKET.to_string(), KEY.to_string()))
}

fn session_query(upload_id: &str) -> ObjectQuery {
    ObjectQuery {
        upload_id: Some(upload_id.to_string()),
        ..ObjectQuery::default()
    }
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn put_part(
    storage: &StorageService,
    upload_id: &str,
    part_number: i32,
    body: &'static [u8],
    headers: HeaderMap,
) -> Result<Response, object_upload::errors::AppError> {
    let query = ObjectQuery {
        part_number: Some(part_number),
        ..session_query(upload_id)
    };
    put_object(
        State(storage.clone()),
        path(),
        Query(query),
        headers,
        Body::from(body),
    )
    .await
}

#[tokio::test]
async fn multipart_round_trip_over_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let storage = service(dir.path()).await;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(ORIGINAL_NAME_HEADER, HeaderValue::from_static("notes.txt"));
    let created = post_object(
        State(storage.clone()),
        path(),
        Query(ObjectQuery {
            uploads: Some(String::new()),
            ..ObjectQuery::default()
        }),
        headers,
        Bytes::new(),
    )
    .await
    .unwrap();
    let created: CreateUploadResponse = json_body(created).await;
    assert_eq!(created.key, KEY);
    let upload_id = created.upload_id;

    let targets = post_object(
        State(storage.clone()),
        path(),
        Query(ObjectQuery {
            targets: Some(String::new()),
            ..session_query(&upload_id)
        }),
        HeaderMap::new(),
        Bytes::from(json!({ "part_numbers": [1, 2] }).to_string()),
    )
    .await
    .unwrap();
    let targets: IssueTargetsResponse = json_body(targets).await;
    assert_eq!(targets.targets.len(), 2);
    assert_eq!(
        targets.targets[1].url,
        format!("/{}/{}?partNumber=2&uploadId={}", BUCKET, KEY, upload_id)
    );

    let mut md5_header = HeaderMap::new();
    let digest = general_purpose::STANDARD.encode(md5::compute(b"hello ").0);
    md5_header.insert("content-md5", HeaderValue::from_str(&digest).unwrap());
    let first = put_part(&storage, &upload_id, 1, b"hello ", md5_header).await.unwrap();
    let second = put_part(&storage, &upload_id, 2, b"world", HeaderMap::new()).await.unwrap();

    let etag = |response: &Response| {
        response.headers()[header::ETAG]
            .to_str()
            .unwrap()
            .to_string()
    };
    let (etag1, etag2) = (etag(&first), etag(&second));
    assert_eq!(etag1, format!("\"{:x}\"", md5::compute(b"hello ")));

    let completed = post_object(
        State(storage.clone()),
        path(),
        Query(session_query(&upload_id)),
        HeaderMap::new(),
        Bytes::from(
            json!({ "parts": [
                { "part_number": 1, "etag": etag1 },
                { "part_number": 2, "etag": etag2 },
            ]})
            .to_string(),
        ),
    )
    .await
    .unwrap();
    let completed: Value = json_body(completed).await;
    assert!(completed["etag"].as_str().unwrap().ends_with("-2"));

    let object = get_object(State(storage.clone()), path()).await.unwrap();
    assert_eq!(object.headers()[header::CONTENT_TYPE], "text/plain");
    let body = to_bytes(object.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"hello world");
}

#[tokio::test]
async fn bad_requests_map_to_client_errors() {
    let dir = tempfile::tempdir().unwrap();
    let storage = service(dir.path()).await;
    let upload = storage
        .create_multipart_upload(BUCKET, KEY, None, None)
        .await
        .unwrap();

    let mut wrong_md5 = HeaderMap::new();
    let digest = general_purpose::STANDARD.encode(md5::compute(b"something else").0);
    wrong_md5.insert("content-md5", HeaderValue::from_str(&digest).unwrap());
    let err = put_part(&storage, &upload.upload_id, 1, b"body", wrong_md5)
        .await
        .err()
        .expect("digest mismatch must fail");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    let err = put_part(&storage, &upload.upload_id, 10_001, b"body", HeaderMap::new())
        .await
        .err()
        .expect("part number out of range must fail");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    let err = post_object(
        State(storage.clone()),
        path(),
        Query(ObjectQuery::default()),
        HeaderMap::new(),
        Bytes::new(),
    )
    .await
    .err()
    .expect("POST without a multipart query must fail");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    let aborted = delete_object(
        State(storage.clone()),
        path(),
        Query(session_query(&upload.upload_id)),
    )
    .await
    .unwrap();
    assert_eq!(aborted.status(), StatusCode::NO_CONTENT);

    let err = delete_object(
        State(storage.clone()),
        path(),
        Query(session_query(&upload.upload_id)),
    )
    .await
    .err()
    .expect("second abort must fail");
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plain_object_put_get_head_delete() {
    let dir = tempfile::tempdir().unwrap();
    let storage = service(dir.path()).await;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/markdown"));
    let put = put_object(
        State(storage.clone()),
        path(),
        Query(ObjectQuery::default()),
        headers,
        Body::from("# plain body"),
    )
    .await
    .unwrap();
    assert_eq!(put.status(), StatusCode::OK);
    let expected_etag = format!("\"{:x}\"", md5::compute(b"# plain body"));
    assert_eq!(put.headers()[header::ETAG], expected_etag.as_str());

    let head = head_object(State(storage.clone()), path()).await.unwrap();
    assert_eq!(head.headers()[header::CONTENT_LENGTH], "12");
    assert_eq!(head.headers()[header::CONTENT_TYPE], "text/markdown");
    assert_eq!(head.headers()[header::ETAG], expected_etag.as_str());
    assert!(head.headers().contains_key(header::LAST_MODIFIED));
    let head_body = to_bytes(head.into_body(), usize::MAX).await.unwrap();
    assert!(head_body.is_empty());

    let get = get_object(State(storage.clone()), path()).await.unwrap();
    assert_eq!(get.headers()[header::ETAG], expected_etag.as_str());
    let body = to_bytes(get.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"# plain body");

    let deleted = delete_object(State(storage.clone()), path(), Query(ObjectQuery::default()))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    // The row is kept and flagged; the payload and its shard dirs are gone.
    let is_deleted: bool = sqlx::query_scalar("SELECT is_deleted FROM objects WHERE key = ?")
        .bind(KEY)
        .fetch_one(&*storage.db)
        .await
        .unwrap();
    assert!(is_deleted);
    let mut bucket_root = tokio::fs::read_dir(dir.path().join("objects").join(BUCKET))
        .await
        .unwrap();
    assert!(bucket_root.next_entry().await.unwrap().is_none());

    let err = get_object(State(storage.clone()), path())
        .await
        .err()
        .expect("deleted object must not be served");
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    let err = head_object(State(storage.clone()), path())
        .await
        .err()
        .expect("deleted object has no metadata");
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    let err = delete_object(State(storage.clone()), path(), Query(ObjectQuery::default()))
        .await
        .err()
        .expect("second delete must fail");
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints_report_ok_on_a_healthy_store() {
    let dir = tempfile::tempdir().unwrap();
    let storage = service(dir.path()).await;

    let live = healthz().await.into_response();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = readyz(State(storage.clone())).await.into_response();
    assert_eq!(ready.status(), StatusCode::OK);
    let report: Value = json_body(ready).await;
    assert_eq!(report["status"], "ok");
    assert_eq!(report["checks"].as_array().unwrap().len(), 2);
    assert!(report["checks"].as_array().unwrap().iter().all(|c| c["ok"] == true));

    // Readiness scratch files are removed again.
    let mut staging = tokio::fs::read_dir(storage.staging_root()).await.unwrap();
    assert!(staging.next_entry().await.unwrap().is_none());
}
