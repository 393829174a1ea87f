//! A bucket: the top-level container uploads are written into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Bucket row. The service manages a single configured bucket, created on
/// first start, but the schema allows several.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// Bucket name, also the first path segment of every object URL.
    pub name: String,

    pub owner_id: Uuid,

    pub region: String,

    pub created_at: DateTime<Utc>,

    pub versioning_enabled: bool,
}
