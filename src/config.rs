use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    models::upload::{ScopeMode, StorageScope},
    services::upload::{
        DEFAULT_PART_SIZE, MAX_PART_SIZE, MIN_PART_SIZE, PartSizePolicy, ProgressGranularity,
        RetryPolicy, UploadError,
    },
};

/// Tuning for the upload pipeline. Injected rather than hard-coded so tests
/// can run with tiny parts.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Maximum part transfers in flight per upload.
    pub concurrency: usize,
    pub part_sizes: PartSizePolicy,
    pub part_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub granularity: ProgressGranularity,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            part_sizes: PartSizePolicy::default(),
            part_timeout: None,
            retry: RetryPolicy::default(),
            granularity: ProgressGranularity::Wave,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.part_timeout.is_some_and(|t| t.is_zero()) {
            return Err(UploadError::InvalidConfig(
                "part timeout must be positive".into(),
            ));
        }
        self.part_sizes.validate()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Bucket uploads are written into; created on start if missing.
    pub bucket: String,
    /// Base URL clients reach this server at, used in part targets.
    pub public_url: String,
    pub scope: StorageScope,
    pub upload: UploadConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multipart object upload service")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides OBJECT_UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Target bucket (overrides OBJECT_UPLOAD_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Storage scope id (overrides OBJECT_UPLOAD_SCOPE)
    #[arg(long)]
    pub scope: Option<String>,

    /// Concurrent part transfers per upload (overrides OBJECT_UPLOAD_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Apply the schema and exit
    Migrate,
    /// Upload one file through the multipart pipeline
    Upload(UploadArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Destination folder inside the scope
    #[arg(long)]
    pub folder: Option<String>,

    /// Relative path, kept verbatim (for folder uploads)
    #[arg(long)]
    pub relative_path: Option<String>,

    #[arg(long)]
    pub content_type: Option<String>,

    /// Report progress after every part instead of every wave
    #[arg(long)]
    pub per_part_progress: bool,

    /// Send to a running server at this URL instead of the local store
    #[arg(long)]
    pub endpoint: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let cfg = Self::from_env(&args)?;
        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    /// Merge CLI overrides over `OBJECT_UPLOAD_*` environment values.
    pub fn from_env(args: &Args) -> Result<Self> {
        let host = args
            .host
            .clone()
            .unwrap_or_else(|| env_or("OBJECT_UPLOAD_HOST", "0.0.0.0"));
        let port = match args.port {
            Some(port) => port,
            None => env_parse("OBJECT_UPLOAD_PORT", 3000)?,
        };

        let mode: ScopeMode = env_parse("OBJECT_UPLOAD_SCOPE_MODE", ScopeMode::Namespaced)?;
        let scope_id = args
            .scope
            .clone()
            .unwrap_or_else(|| env_or("OBJECT_UPLOAD_SCOPE", ""));

        let concurrency = match args.concurrency {
            Some(concurrency) => concurrency,
            None => env_parse("OBJECT_UPLOAD_CONCURRENCY", 5)?,
        };
        let part_timeout = match env_parse::<u64>("OBJECT_UPLOAD_PART_TIMEOUT_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let upload = UploadConfig {
            concurrency,
            part_sizes: PartSizePolicy {
                target: env_parse("OBJECT_UPLOAD_PART_SIZE", DEFAULT_PART_SIZE)?,
                min: env_parse("OBJECT_UPLOAD_MIN_PART_SIZE", MIN_PART_SIZE)?,
                max: env_parse("OBJECT_UPLOAD_MAX_PART_SIZE", MAX_PART_SIZE)?,
            },
            part_timeout,
            retry: RetryPolicy {
                max_retries: env_parse("OBJECT_UPLOAD_PART_RETRIES", 0)?,
                ..RetryPolicy::default()
            },
            granularity: ProgressGranularity::Wave,
        };
        if let Err(err) = upload.validate() {
            bail!("{}", err);
        }

        let cfg = Self {
            public_url: env::var("OBJECT_UPLOAD_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://{}:{}", host, port)),
            host,
            port,
            storage_dir: args
                .storage_dir
                .clone()
                .unwrap_or_else(|| env_or("OBJECT_UPLOAD_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.clone().unwrap_or_else(|| {
                env_or(
                    "OBJECT_UPLOAD_DATABASE_URL",
                    "sqlite://./data/meta/object_upload.db",
                )
            }),
            bucket: args
                .bucket
                .clone()
                .unwrap_or_else(|| env_or("OBJECT_UPLOAD_BUCKET", "uploads")),
            scope: StorageScope { mode, id: scope_id },
            upload,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_upload_config_is_valid() {
        let cfg = UploadConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.part_sizes.target, 10 * 1024 * 1024);
    }

    #[test]
    fn rejects_zero_concurrency_and_zero_timeout() {
        let cfg = UploadConfig {
            concurrency: 0,
            ..UploadConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(UploadError::InvalidConfig(_))));

        let cfg = UploadConfig {
            part_timeout: Some(Duration::ZERO),
            ..UploadConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(UploadError::InvalidConfig(_))));
    }

    #[test]
    fn cli_overrides_win() {
        let args = Args::parse_from([
            "object-upload",
            "--port",
            "8080",
            "--bucket",
            "media",
            "--scope",
            "alice",
            "--concurrency",
            "3",
            "upload",
            "big.iso",
            "--folder",
            "isos",
        ]);
        let cfg = AppConfig::from_env(&args).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.bucket, "media");
        assert_eq!(cfg.scope.id, "alice");
        assert_eq!(cfg.upload.concurrency, 3);
        match args.command {
            Some(Command::Upload(upload)) => {
                assert_eq!(upload.file, PathBuf::from("big.iso"));
                assert_eq!(upload.folder.as_deref(), Some("isos"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
