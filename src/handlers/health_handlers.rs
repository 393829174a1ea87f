//! Liveness and readiness checks.

use crate::services::storage_service::StorageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheck {
    fn from_result(name: &'static str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { name, ok: true, error: None },
            Err(error) => Self { name, ok: false, error: Some(error) },
        }
    }
}

/// `GET /healthz`: no I/O.
pub async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        checks: Vec::new(),
    })
}

/// `GET /readyz`: 503 unless SQLite answers and part staging is writable.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let checks = vec![
        HealthCheck::from_result("sqlite", check_sqlite(&service).await),
        HealthCheck::from_result("staging", check_staging(&service).await),
    ];

    let ready = checks.iter().all(|check| check.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "error" },
            checks,
        }),
    )
}

async fn check_sqlite(service: &StorageService) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(other) => Err(format!("unexpected result: {}", other)),
        Err(err) => Err(err.to_string()),
    }
}

/// Write, read back and remove a scratch file where parts get staged.
async fn check_staging(service: &StorageService) -> Result<(), String> {
    let dir = service.staging_root();
    fs::create_dir_all(&dir)
        .await
        .map_err(|err| format!("could not create {}: {}", dir.display(), err))?;

    let scratch = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let outcome = async {
        fs::write(&scratch, b"readyz")
            .await
            .map_err(|err| format!("write failed: {}", err))?;
        match fs::read(&scratch).await {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("scratch content mismatch".to_string()),
            Err(err) => Err(format!("read failed: {}", err)),
        }
    }
    .await;

    let _ = fs::remove_file(&scratch).await;
    outcome
}
