//! Source object identity and stored-object metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity of an object in the store, as carried by a producer trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceObject {
    pub bucket: String,
    pub key: String,
}

impl SourceObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Metadata row for one stored object version.
///
/// Every put creates a new version with a fresh `version_id`; the previous
/// latest row is demoted. Payload bytes live on disk addressed by the
/// version id, so versions of the same key never clobber each other.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal row id.
    pub id: Uuid,

    /// Bucket (namespace) the object belongs to.
    pub bucket: String,

    /// Path-like key within the bucket.
    pub key: String,

    /// Version identifier, unique across the store.
    pub version_id: String,

    /// Content type as supplied at upload time.
    pub content_type: Option<String>,

    /// Payload size in bytes.
    pub size_bytes: i64,

    /// MD5 digest of the payload, hex encoded.
    pub etag: String,

    /// When this version was written.
    pub created_at: DateTime<Utc>,

    /// Whether this row is the current version of its key.
    pub is_latest: bool,
}
