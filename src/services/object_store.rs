//! Versioned object storage behind the `ObjectStore` seam.
//!
//! `LocalObjectStore` keeps metadata in SQLite and payload bytes on disk,
//! sharded beneath `base_path/{bucket}/{shard}/{shard}/{version_id}`. Every
//! put writes a brand-new version and demotes the previous latest row, which
//! is what lets the lifecycle manager resolve and delete the exact version it
//! observed instead of whatever happens to be current at delete time.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream::BoxStream};
use md5::Context as Md5Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::models::object::StoredObject;

/// Payload bytes as an owned chunk stream.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("version `{version_id}` of `{bucket}/{key}` not found")]
    VersionNotFound {
        bucket: String,
        key: String,
        version_id: String,
    },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("invalid bucket name `{0}`")]
    InvalidBucketName(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The object-store seam consumed by the import pipeline.
///
/// The production adapter is [`LocalObjectStore`]; tests substitute an
/// in-memory implementation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a new version of `bucket/key` from a chunk stream.
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: ByteStream,
    ) -> StorageResult<StoredObject>;

    /// Open the latest version of `bucket/key` for reading.
    async fn get_reader(&self, bucket: &str, key: &str)
    -> StorageResult<(StoredObject, ByteStream)>;

    /// Copy the latest version of `src_key` to a new version of `dest_key`
    /// within the same bucket.
    async fn copy(&self, bucket: &str, src_key: &str, dest_key: &str)
    -> StorageResult<StoredObject>;

    /// Resolve the current version id of `bucket/key`, if any.
    async fn latest_version(&self, bucket: &str, key: &str) -> StorageResult<Option<String>>;

    /// Delete exactly the named version. Fails with `VersionNotFound` if the
    /// version no longer exists (re-upload race, already deleted).
    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str)
    -> StorageResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Disk + SQLite object store.
#[derive(Clone)]
pub struct LocalObjectStore {
    db: Arc<SqlitePool>,
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape the storage root.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
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

    /// Bucket names become directory names, so hold them to a narrow charset.
    fn ensure_bucket_safe(bucket: &str) -> StorageResult<()> {
        let ok = !bucket.is_empty()
            && bucket.len() <= MAX_BUCKET_NAME_LEN
            && bucket
                .chars()
                .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '.'))
            && !bucket.starts_with(['-', '.'])
            && !bucket.ends_with(['-', '.']);
        if ok {
            Ok(())
        } else {
            Err(StorageError::InvalidBucketName(bucket.to_string()))
        }
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Payload path for one version: two md5-derived shard levels keep the
    /// per-directory file count down.
    fn version_path(&self, bucket: &str, version_id: &str) -> PathBuf {
        let digest = md5::compute(version_id.as_bytes());
        let mut path = self.bucket_root(bucket);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(version_id);
        path
    }

    async fn fetch_latest(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket, key, version_id, content_type, size_bytes, etag,
                    created_at, is_latest
             FROM objects WHERE bucket = ? AND key = ? AND is_latest = 1",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Demote the current latest row of `key` and insert `object` as the new
    /// latest, atomically.
    async fn record_new_version(&self, object: &StoredObject) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE objects SET is_latest = 0 WHERE bucket = ? AND key = ? AND is_latest = 1")
            .bind(&object.bucket)
            .bind(&object.key)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO objects (id, bucket, key, version_id, content_type, size_bytes,
                                  etag, created_at, is_latest)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(object.id)
        .bind(&object.bucket)
        .bind(&object.key)
        .bind(&object.version_id)
        .bind(object.content_type.clone())
        .bind(object.size_bytes)
        .bind(&object.etag)
        .bind(object.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Stream bytes into a temp file, fsync, and rename to the version path.
    /// Returns size and etag. Cleans the temp file up on any failure.
    async fn write_payload<S>(&self, final_path: &Path, stream: S) -> StorageResult<(i64, String)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let parent = final_path
            .parent()
            .ok_or_else(|| {
                StorageError::Io(io::Error::other("version path missing parent directory"))
            })?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Md5Context::new();
        pin_mut!(stream);

        let write_result: StorageResult<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                size_bytes += chunk.len() as i64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, final_path).await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Remove directories left empty after a delete, up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
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
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: ByteStream,
    ) -> StorageResult<StoredObject> {
        Self::ensure_bucket_safe(bucket)?;
        Self::ensure_key_safe(key)?;

        let version_id = Uuid::new_v4().to_string();
        let final_path = self.version_path(bucket, &version_id);
        let (size_bytes, etag) = self.write_payload(&final_path, stream).await?;

        let object = StoredObject {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
            content_type,
            size_bytes,
            etag,
            created_at: Utc::now(),
            is_latest: true,
        };

        if let Err(err) = self.record_new_version(&object).await {
            let _ = fs::remove_file(&final_path).await;
            return Err(err);
        }
        Ok(object)
    }

    async fn get_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(StoredObject, ByteStream)> {
        Self::ensure_bucket_safe(bucket)?;
        Self::ensure_key_safe(key)?;
        let object = self.fetch_latest(bucket, key).await?;

        let path = self.version_path(bucket, &object.version_id);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, ReaderStream::new(file).boxed()))
    }

    async fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dest_key: &str,
    ) -> StorageResult<StoredObject> {
        Self::ensure_bucket_safe(bucket)?;
        Self::ensure_key_safe(src_key)?;
        Self::ensure_key_safe(dest_key)?;
        let source = self.fetch_latest(bucket, src_key).await?;

        let version_id = Uuid::new_v4().to_string();
        let src_path = self.version_path(bucket, &source.version_id);
        let dest_path = self.version_path(bucket, &version_id);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_path, &dest_path).await?;

        let object = StoredObject {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            key: dest_key.to_string(),
            version_id,
            content_type: source.content_type.clone(),
            size_bytes: source.size_bytes,
            etag: source.etag.clone(),
            created_at: Utc::now(),
            is_latest: true,
        };

        if let Err(err) = self.record_new_version(&object).await {
            let _ = fs::remove_file(&dest_path).await;
            return Err(err);
        }
        Ok(object)
    }

    async fn latest_version(&self, bucket: &str, key: &str) -> StorageResult<Option<String>> {
        Self::ensure_bucket_safe(bucket)?;
        Self::ensure_key_safe(key)?;
        let version = sqlx::query_scalar::<_, String>(
            "SELECT version_id FROM objects WHERE bucket = ? AND key = ? AND is_latest = 1",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(version)
    }

    async fn delete_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> StorageResult<()> {
        Self::ensure_bucket_safe(bucket)?;
        Self::ensure_key_safe(key)?;

        let result =
            sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ? AND version_id = ?")
                .bind(bucket)
                .bind(key)
                .bind(version_id)
                .execute(&*self.db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::VersionNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
                version_id: version_id.to_string(),
            });
        }

        let path = self.version_path(bucket, version_id);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed payload {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            let root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &root).await;
        }
        Ok(())
    }
}
