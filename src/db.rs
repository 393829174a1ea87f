//! SQLite pool setup and schema bootstrap.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool for `database_url`, creating the database file and its
/// parent directory when missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    if let Some(path) = sqlite_file_path(database_url) {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
                info!("created database directory {}", parent.display());
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;
    Ok(pool)
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let statements: Vec<&str> = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    info!("running {} migration statements", statements.len());
    for stmt in statements {
        debug!("executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("migration statement failed: {}", stmt))?;
    }
    Ok(())
}

/// Local file behind a `sqlite:` URL, if it names one.
fn sqlite_file_path(database_url: &str) -> Option<&str> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}
