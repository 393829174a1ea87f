//! Metadata for a stored object, either PUT directly or assembled from a
//! completed multipart session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Object metadata row; the payload itself lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    pub id: Uuid,

    pub bucket_id: Uuid,

    /// Path-like key within the bucket, e.g. `alice/reports/q1.pdf`.
    pub key: String,

    /// Original file name as supplied by the uploader.
    pub filename: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Hex MD5 for single PUTs, `md5(part md5s)-N` for multipart objects.
    pub etag: Option<String>,

    pub storage_class: String,

    pub last_modified: DateTime<Utc>,

    pub version_id: Option<String>,

    /// Soft-delete marker.
    pub is_deleted: bool,
}
