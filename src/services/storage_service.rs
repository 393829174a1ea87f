//! src/services/storage_service.rs
//!
//! StorageService: the reference object-storage backend. Metadata lives in
//! SQLite, payloads on local disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. Multipart sessions stage their
//! parts under `base_path/.multipart/{upload_id}/{part_number}` until they are
//! assembled (complete) or discarded (abort).

use crate::models::{
    bucket::Bucket,
    multipart::{CompletedPart, MAX_PART_NUMBER, MultipartPart, MultipartUpload},
    object::Object,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("multipart upload `{0}` not found")]
    UploadNotFound(String),
    #[error("part number {0} is outside 1..=10000")]
    InvalidPartNumber(i32),
    #[error("part {part_number} rejected: {reason}")]
    InvalidPart { part_number: i32, reason: String },
    #[error("parts must be listed in strictly ascending order")]
    InvalidPartOrder,
    #[error("part {part_number} is {size} bytes, below the {min} byte minimum")]
    EntityTooSmall { part_number: i32, size: i64, min: u64 },
    #[error("Content-MD5 of part {part_number} does not match the received body")]
    BadDigest { part_number: i32 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the backend half of the upload contract:
/// - multipart sessions: create, stage part, complete, abort
/// - plain objects: streaming put, get, head, soft delete
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Smallest size accepted for any part but the last one at completion.
    pub min_part_size: u64,
}

/// S3's lower bound for non-final parts.
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const STAGING_DIR: &str = ".multipart";
const COPY_BUF_LEN: usize = 64 * 1024;

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            min_part_size: DEFAULT_MIN_PART_SIZE,
        }
    }

    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Bucket names: 3–63 chars of `[a-z0-9.-]`, alphanumeric at both ends.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), to keep directory
    /// fan-out bounded.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Directory under which every session stages its parts.
    pub fn staging_root(&self) -> PathBuf {
        self.base_path.join(STAGING_DIR)
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.staging_root().join(upload_id)
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<sqlx::sqlite::Sqlite, Bucket>(
            "SELECT id, name, owner_id, region, created_at, versioning_enabled
             FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, filename, content_type, size_bytes, etag,
                    storage_class, last_modified, version_id, is_deleted
             FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Look up an open session by its client-facing id alone.
    async fn fetch_upload(&self, upload_id: &str) -> StorageResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(
            "SELECT id, bucket_id, key, upload_id, content_type, filename, initiated_at, completed
             FROM multipart_uploads
             WHERE upload_id = ? AND completed = 0",
        )
        .bind(upload_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::UploadNotFound(upload_id.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Look up an open session and check it belongs to `bucket`/`key`.
    async fn fetch_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<(Bucket, MultipartUpload)> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(upload_id).await?;
        if upload.bucket_id != bucket_rec.id || upload.key != key {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        Ok((bucket_rec, upload))
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> StorageResult<Vec<MultipartPart>> {
        let parts = sqlx::query_as::<_, MultipartPart>(
            "SELECT id, upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts
             WHERE upload_id = ?
             ORDER BY part_number ASC",
        )
        .bind(upload.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(parts)
    }

    /// Insert or overwrite the metadata row for `key` (S3 overwrite semantics).
    async fn upsert_object(
        &self,
        bucket_rec: &Bucket,
        key: &str,
        filename: &str,
        content_type: Option<String>,
        size_bytes: i64,
        etag: &str,
    ) -> Result<Object, sqlx::Error> {
        sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, filename, content_type, size_bytes,
                etag, storage_class, last_modified, version_id, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                storage_class = excluded.storage_class,
                last_modified = excluded.last_modified,
                version_id = excluded.version_id,
                is_deleted = 0
            RETURNING id, bucket_id, key, filename, content_type, size_bytes,
                      etag, storage_class, last_modified, version_id, is_deleted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind("STANDARD")
        .bind(Utc::now())
        .bind::<Option<String>>(None)
        .fetch_one(&*self.db)
        .await
    }

    /// Create the bucket unless it already exists.
    pub async fn ensure_bucket(&self, name: &str) -> StorageResult<Bucket> {
        match self.fetch_bucket(name).await {
            Ok(bucket) => Ok(bucket),
            Err(StorageError::BucketNotFound(_)) => match self.create_bucket(name).await {
                Err(StorageError::BucketAlreadyExists(_)) => self.fetch_bucket(name).await,
                other => other,
            },
            Err(err) => Err(err),
        }
    }

    /// Create a bucket row and its directory.
    pub async fn create_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: Uuid::new_v4(),
            region: "local".into(),
            created_at: Utc::now(),
            versioning_enabled: false,
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, region, created_at, versioning_enabled)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.owner_id)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .bind(bucket.versioning_enabled)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {
                info!(bucket = %bucket.name, "created bucket");
                Ok(bucket)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Stream-upload an object to disk and upsert its metadata.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = parent_dir(&file_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, digest) = write_stream(&tmp_path, stream).await?;
        replace_file(&tmp_path, &file_path).await?;

        let filename = key.rsplit('/').next().unwrap_or(key);
        let etag = format!("{:x}", digest);
        match self
            .upsert_object(&bucket_rec, key, filename, content_type, size_bytes, &etag)
            .await
        {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Metadata plus an open file handle for streaming the payload out.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(Object, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    /// Soft-delete an object, remove its payload and prune empty shard dirs.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        sqlx::query("UPDATE objects SET is_deleted = 1 WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            prune_empty_dirs(parent, &self.bucket_root(&bucket_rec.name)).await;
        }

        Ok(object)
    }

    /// Open a multipart session for `bucket`/`key`.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        filename: Option<String>,
    ) -> StorageResult<MultipartUpload> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let upload = MultipartUpload {
            id: Uuid::new_v4(),
            bucket_id: bucket_rec.id,
            key: key.to_string(),
            upload_id: Uuid::new_v4().simple().to_string(),
            content_type,
            filename: filename
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| key.rsplit('/').next().unwrap_or(key).to_string()),
            initiated_at: Utc::now(),
            completed: false,
        };

        fs::create_dir_all(self.staging_dir(&upload.upload_id)).await?;
        sqlx::query(
            "INSERT INTO multipart_uploads
                (id, bucket_id, key, upload_id, content_type, filename, initiated_at, completed)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(upload.id)
        .bind(upload.bucket_id)
        .bind(&upload.key)
        .bind(&upload.upload_id)
        .bind(&upload.content_type)
        .bind(&upload.filename)
        .bind(upload.initiated_at)
        .execute(&*self.db)
        .await?;

        info!(bucket, key, upload_id = %upload.upload_id, "opened multipart upload");
        Ok(upload)
    }

    /// Fetch an open session, checking it belongs to `bucket`/`key`.
    pub async fn get_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<MultipartUpload> {
        self.fetch_session(bucket, key, upload_id)
            .await
            .map(|(_, upload)| upload)
    }

    /// Stage one part. Re-uploading a part number replaces the earlier body.
    ///
    /// When `content_md5` is given the staged body must hash to it.
    pub async fn upload_part<S>(
        &self,
        upload_id: &str,
        part_number: i32,
        content_md5: Option<[u8; 16]>,
        stream: S,
    ) -> StorageResult<MultipartPart>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidPartNumber(part_number));
        }
        let upload = self.fetch_upload(upload_id).await?;

        let staging = self.staging_dir(upload_id);
        fs::create_dir_all(&staging).await?;
        let tmp_path = staging.join(format!(".tmp-{}", Uuid::new_v4()));
        let (size_bytes, digest) = write_stream(&tmp_path, stream).await?;

        if content_md5.is_some_and(|expected| expected != digest.0) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::BadDigest { part_number });
        }
        replace_file(&tmp_path, &staging.join(part_number.to_string())).await?;

        let part = sqlx::query_as::<_, MultipartPart>(
            r#"
            INSERT INTO multipart_parts (id, upload_id, part_number, size_bytes, etag, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at
            RETURNING id, upload_id, part_number, size_bytes, etag, uploaded_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upload.id)
        .bind(part_number)
        .bind(size_bytes)
        .bind(format!("{:x}", digest))
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(upload_id, part_number, size_bytes, "staged part");
        Ok(part)
    }

    /// Assemble the listed parts into the session's object.
    ///
    /// `parts` must be strictly ascending, each must match a staged part's
    /// ETag, and every part except the last must reach `min_part_size`.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<Object> {
        let (bucket_rec, upload) = self.fetch_session(bucket, key, upload_id).await?;

        if parts.is_empty() {
            return Err(StorageError::InvalidPart {
                part_number: 0,
                reason: "at least one part is required".into(),
            });
        }
        if parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::InvalidPartOrder);
        }

        let staged: HashMap<i32, MultipartPart> = self
            .list_parts(&upload)
            .await?
            .into_iter()
            .map(|part| (part.part_number, part))
            .collect();
        let last = parts.len() - 1;
        for (idx, requested) in parts.iter().enumerate() {
            let part_number = requested.part_number;
            let stored = staged
                .get(&part_number)
                .ok_or_else(|| StorageError::InvalidPart {
                    part_number,
                    reason: "part was never uploaded".into(),
                })?;
            if requested.etag.trim_matches('"') != stored.etag {
                return Err(StorageError::InvalidPart {
                    part_number,
                    reason: "etag does not match the stored part".into(),
                });
            }
            if idx < last && (stored.size_bytes as u64) < self.min_part_size {
                return Err(StorageError::EntityTooSmall {
                    part_number,
                    size: stored.size_bytes,
                    min: self.min_part_size,
                });
            }
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = parent_dir(&file_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let staging = self.staging_dir(upload_id);
        let (size_bytes, digests) = match concat_parts(&tmp_path, &staging, parts).await {
            Ok(assembled) => assembled,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        replace_file(&tmp_path, &file_path).await?;

        let etag = multipart_etag(&digests);
        let object = match self
            .upsert_object(
                &bucket_rec,
                key,
                &upload.filename,
                upload.content_type.clone(),
                size_bytes,
                &etag,
            )
            .await
        {
            Ok(obj) => obj,
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE multipart_uploads SET completed = 1 WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        remove_staging(&staging).await;

        info!(bucket, key, upload_id, parts = parts.len(), size_bytes, "completed multipart upload");
        Ok(object)
    }

    /// Discard a session and everything staged for it.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let (_, upload) = self.fetch_session(bucket, key, upload_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        remove_staging(&self.staging_dir(upload_id)).await;

        info!(bucket, key, upload_id, "aborted multipart upload");
        Ok(())
    }
}

fn parent_dir(path: &Path) -> StorageResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })
}

/// Write `stream` to `tmp_path`, fsync it, and return its size and MD5.
/// The temp file is removed on failure.
async fn write_stream<S>(tmp_path: &Path, stream: S) -> StorageResult<(i64, md5::Digest)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(tmp_path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);

    let written: io::Result<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(tmp_path).await;
        return Err(StorageError::Io(err));
    }
    Ok((size_bytes, digest.compute()))
}

/// Move `tmp_path` over `dest`, replacing whatever is there.
async fn replace_file(tmp_path: &Path, dest: &Path) -> StorageResult<()> {
    if let Err(err) = fs::rename(tmp_path, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp_path, dest).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StorageError::Io(err));
        }
    }
    Ok(())
}

/// Concatenate staged parts into `dest`, hashing each part on the way.
async fn concat_parts(
    dest: &Path,
    staging: &Path,
    parts: &[CompletedPart],
) -> io::Result<(i64, Vec<md5::Digest>)> {
    let mut out = File::create(dest).await?;
    let mut buf = vec![0u8; COPY_BUF_LEN];
    let mut size_bytes: i64 = 0;
    let mut digests = Vec::with_capacity(parts.len());

    for part in parts {
        let mut input = File::open(staging.join(part.part_number.to_string())).await?;
        let mut digest = Context::new();
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digest.consume(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            size_bytes += n as i64;
        }
        digests.push(digest.compute());
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok((size_bytes, digests))
}

/// S3-style multipart ETag: MD5 over the concatenated binary part digests,
/// suffixed with the part count.
fn multipart_etag(digests: &[md5::Digest]) -> String {
    let mut combined = Context::new();
    for digest in digests {
        combined.consume(digest.0);
    }
    format!("{:x}-{}", combined.compute(), digests.len())
}

async fn remove_staging(staging: &Path) {
    if let Err(err) = fs::remove_dir_all(staging).await {
        if err.kind() != ErrorKind::NotFound {
            debug!("failed to remove staging dir {}: {}", staging.display(), err);
        }
    }
}

/// Remove empty directories from `start` upwards, stopping at `stop`.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_etag_suffixes_part_count() {
        let digests = vec![md5::compute(b"hello"), md5::compute(b"world")];
        let etag = multipart_etag(&digests);
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);

        let mut joined = Vec::new();
        joined.extend_from_slice(&digests[0].0);
        joined.extend_from_slice(&digests[1].0);
        assert_eq!(etag, format!("{:x}-2", md5::compute(joined)));
    }
}
