//! Pipeline driven over HTTP against a live server on a loopback port.

use std::{path::Path, sync::Arc};

use object_upload::{
    config::UploadConfig,
    db,
    models::upload::{StorageScope, UploadRequest},
    routes::routes::routes,
    services::{
        storage_service::StorageService,
        upload::{BackendError, HttpBackend, NoProgress, PartSizePolicy, UploadError, UploadService},
    },
};
use tokio::{io::AsyncReadExt, net::TcpListener};
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "uploads";

async fn serve(dir: &Path, min_part_size: u64) -> (StorageService, String) {
    let url = format!("sqlite://{}", dir.join("meta.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let storage = StorageService::new(Arc::new(pool), dir.join("objects"))
        .with_min_part_size(min_part_size);
    storage.ensure_bucket(BUCKET).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes().with_state(storage.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (storage, format!("http://{}", addr))
}

fn eight_byte_parts() -> UploadConfig {
    UploadConfig {
        concurrency: 2,
        part_sizes: PartSizePolicy {
            target: 8,
            min: 8,
            max: 1024,
        },
        ..UploadConfig::default()
    }
}

async fn open_sessions(storage: &StorageService) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM multipart_uploads WHERE completed = 0")
        .fetch_one(&*storage.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn parts_are_sent_to_their_target_urls() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, base_url) = serve(dir.path(), 8).await;
    let backend = Arc::new(HttpBackend::new(&base_url, BUCKET).unwrap());
    let service = UploadService::new(backend, eight_byte_parts()).unwrap();

    let data: Vec<u8> = (0..20u8).collect();
    let source = bytes::Bytes::from(data.clone());
    for name in ["plain.bin", "why?.txt", "50% off #1.txt", "a b.txt"] {
        let request = UploadRequest::new(name, 20, StorageScope::namespaced("alice"))
            .with_content_type("application/x-test");

        let outcome = service
            .upload_file(&request, &source, NoProgress, CancellationToken::new())
            .await
            .unwrap_or_else(|failure| panic!("{}: {}", name, failure));
        let key = format!("alice/{}", name);
        assert_eq!(outcome.key, key);
        assert_eq!(outcome.part_count, 3);
        assert!(outcome.etag.ends_with("-3"), "etag: {}", outcome.etag);
        assert!(outcome.location.starts_with(&base_url));

        let (meta, mut file) = storage.get_object_reader(BUCKET, &key).await.unwrap();
        let mut stored = Vec::new();
        file.read_to_end(&mut stored).await.unwrap();
        assert_eq!(stored, data, "{}", name);
        assert_eq!(meta.content_type.as_deref(), Some("application/x-test"));
        assert_eq!(meta.filename, name);
    }
    assert_eq!(open_sessions(&storage).await, 0);
}

#[tokio::test]
async fn server_rejection_surfaces_as_status_and_session_is_aborted() {
    let dir = tempfile::tempdir().unwrap();
    // The server wants 16-byte parts; the client plans 8.
    let (storage, base_url) = serve(dir.path(), 16).await;
    let backend = Arc::new(HttpBackend::new(&base_url, BUCKET).unwrap());
    let service = UploadService::new(backend, eight_byte_parts()).unwrap();

    let request = UploadRequest::new("small.bin", 20, StorageScope::whole());
    let failure = service
        .upload_file(
            &request,
            &bytes::Bytes::from(vec![1u8; 20]),
            NoProgress,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(
            failure.primary,
            UploadError::FinalizationFailed(BackendError::Status { status: 400, .. })
        ),
        "{}",
        failure
    );
    assert!(failure.abort.is_none());
    assert_eq!(open_sessions(&storage).await, 0);
}

#[tokio::test]
async fn unreachable_server_fails_session_creation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = Arc::new(HttpBackend::new(format!("http://{}", addr), BUCKET).unwrap());
    let service = UploadService::new(backend, eight_byte_parts()).unwrap();
    let request = UploadRequest::new("a.bin", 4, StorageScope::whole());

    let failure = service
        .upload_file(
            &request,
            &bytes::Bytes::from_static(b"data"),
            NoProgress,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        failure.primary,
        UploadError::SessionCreateFailed(BackendError::Transport(_))
    ));
}
