use anyhow::{Result, bail};
use axum::Router;
use object_upload::{
    config::{AppConfig, Command, UploadArgs},
    db,
    models::upload::{UploadProgress, UploadRequest},
    routes,
    services::{
        storage_service::StorageService,
        upload::{
            FileSource, HttpBackend, LocalBackend, ProgressGranularity, StorageBackend,
            UploadService,
        },
    },
};
use sqlx::SqlitePool;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::info!("starting object-upload with config: {:?}", cfg);

    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("created storage directory at {}", cfg.storage_dir);
    }

    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    match command {
        Command::Migrate => {
            tracing::info!("database migration complete");
            Ok(())
        }
        Command::Serve => {
            let storage = open_storage(&cfg, pool).await?;
            serve(&cfg, storage).await
        }
        Command::Upload(args) => {
            let backend: Arc<dyn StorageBackend> = match &args.endpoint {
                Some(endpoint) => {
                    tracing::info!("uploading to {}", endpoint);
                    Arc::new(HttpBackend::new(endpoint, &cfg.bucket)?)
                }
                None => {
                    let storage = open_storage(&cfg, pool).await?;
                    Arc::new(LocalBackend::new(storage, &cfg.bucket, &cfg.public_url))
                }
            };
            upload(&cfg, backend, args).await
        }
    }
}

async fn open_storage(cfg: &AppConfig, pool: SqlitePool) -> Result<StorageService> {
    let storage = StorageService::new(Arc::new(pool), cfg.storage_dir.clone())
        .with_min_part_size(cfg.upload.part_sizes.min);
    storage.ensure_bucket(&cfg.bucket).await?;
    Ok(storage)
}

async fn serve(cfg: &AppConfig, storage: StorageService) -> Result<()> {
    let app: Router = routes::routes::routes().with_state(storage);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "permission denied binding to {} ({}), falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Push one local file through the multipart pipeline.
async fn upload(cfg: &AppConfig, backend: Arc<dyn StorageBackend>, args: UploadArgs) -> Result<()> {
    let mut upload_cfg = cfg.upload.clone();
    if args.per_part_progress {
        upload_cfg.granularity = ProgressGranularity::PerPart;
    }

    let service = UploadService::new(backend, upload_cfg)?;

    let source = FileSource::new(&args.file);
    let size = source.len().await?;
    let file_name = match args.file.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => bail!("`{}` does not name a file", args.file.display()),
    };

    let mut request = UploadRequest::new(file_name, size, cfg.scope.clone());
    if let Some(content_type) = args.content_type {
        request = request.with_content_type(content_type);
    }
    if let Some(folder) = args.folder {
        request = request.with_folder(folder);
    }
    if let Some(relative_path) = args.relative_path {
        request = request.with_relative_path(relative_path);
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling upload");
            on_ctrl_c.cancel();
        }
    });

    let observer = |progress: &UploadProgress| {
        tracing::info!(
            file = %progress.file_name,
            status = ?progress.status,
            "{}/{} parts ({:.1}%)",
            progress.completed_parts,
            progress.total_parts,
            progress.percentage
        );
    };

    match service.upload_file(&request, &source, observer, cancel).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(failure) => {
            if let Some(abort) = &failure.abort {
                tracing::error!("session cleanup failed: {}", abort);
            }
            Err(failure.into())
        }
    }
}
