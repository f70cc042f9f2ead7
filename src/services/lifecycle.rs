//! Source-object finalization: copy into the processed namespace, then
//! retire the incoming copy.
//!
//! Strictly copy-before-delete. The version deleted is the one observed *at
//! finalize time*, never a cached one — the object may have been re-uploaded
//! while the file was streaming, and that newer version must survive to be
//! imported by its own trigger.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::object::SourceObject;
use crate::services::object_store::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("key `{0}` is not under the incoming prefix")]
    NotIncoming(String),
    #[error("copying to processed namespace failed: {0}")]
    Copy(#[source] StorageError),
    #[error("no current version found for `{bucket}/{key}`")]
    NoCurrentVersion { bucket: String, key: String },
    #[error("incoming version vanished before delete: {0}")]
    VersionVanished(#[source] StorageError),
    #[error("deleting incoming version failed: {0}")]
    Delete(#[source] StorageError),
    #[error("resolving current version failed: {0}")]
    Resolve(#[source] StorageError),
}

/// Moves fully-streamed source objects from `incoming` to `processed`.
pub struct ObjectLifecycleManager {
    store: Arc<dyn ObjectStore>,
    incoming_prefix: String,
    processed_prefix: String,
}

impl ObjectLifecycleManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        incoming_prefix: impl Into<String>,
        processed_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            incoming_prefix: incoming_prefix.into(),
            processed_prefix: processed_prefix.into(),
        }
    }

    /// The destination key for a finalized source key.
    pub fn processed_key(&self, key: &str) -> Option<String> {
        if !key.starts_with(self.incoming_prefix.as_str()) {
            return None;
        }
        Some(key.replacen(&self.incoming_prefix, &self.processed_prefix, 1))
    }

    /// Copy the object into the processed namespace, then delete the version
    /// of the incoming key that is current right now.
    ///
    /// Any failure leaves the incoming object untouched and eligible for
    /// replay; the anomaly cases (copy failed, version missing) are logged
    /// with enough context for manual intervention.
    pub async fn finalize(&self, source: &SourceObject) -> Result<(), LifecycleError> {
        let processed_key = self
            .processed_key(&source.key)
            .ok_or_else(|| LifecycleError::NotIncoming(source.key.clone()))?;

        self.store
            .copy(&source.bucket, &source.key, &processed_key)
            .await
            .map_err(|err| {
                warn!(
                    bucket = %source.bucket,
                    key = %source.key,
                    error = %err,
                    "copy to processed namespace failed; leaving source in place"
                );
                LifecycleError::Copy(err)
            })?;
        info!(
            bucket = %source.bucket,
            from = %source.key,
            to = %processed_key,
            "copied into processed namespace"
        );

        let current = self
            .store
            .latest_version(&source.bucket, &source.key)
            .await
            .map_err(LifecycleError::Resolve)?;
        let Some(version_id) = current else {
            warn!(
                bucket = %source.bucket,
                key = %source.key,
                "no current version at finalize time; refusing to delete blindly"
            );
            return Err(LifecycleError::NoCurrentVersion {
                bucket: source.bucket.clone(),
                key: source.key.clone(),
            });
        };

        match self
            .store
            .delete_version(&source.bucket, &source.key, &version_id)
            .await
        {
            Ok(()) => {
                info!(
                    bucket = %source.bucket,
                    key = %source.key,
                    version_id = %version_id,
                    "retired incoming object"
                );
                Ok(())
            }
            Err(err @ StorageError::VersionNotFound { .. }) => {
                warn!(
                    bucket = %source.bucket,
                    key = %source.key,
                    version_id = %version_id,
                    "incoming version vanished between resolve and delete"
                );
                Err(LifecycleError::VersionVanished(err))
            }
            Err(err) => Err(LifecycleError::Delete(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::MemoryObjectStore;
    use std::sync::atomic::Ordering;

    fn manager(store: Arc<MemoryObjectStore>) -> ObjectLifecycleManager {
        ObjectLifecycleManager::new(store, "uploaded", "parsed")
    }

    #[tokio::test]
    async fn finalize_copies_then_deletes_incoming() {
        let store = Arc::new(MemoryObjectStore::with_object(
            "imports",
            "uploaded/items.csv",
            b"data",
        ));
        manager(store.clone())
            .finalize(&SourceObject::new("imports", "uploaded/items.csv"))
            .await
            .unwrap();

        assert!(!store.contains("imports", "uploaded/items.csv"));
        assert!(store.contains("imports", "parsed/items.csv"));

        // Copy must strictly precede the delete.
        let ops = store.ops.lock().unwrap().clone();
        let copy_at = ops.iter().position(|op| op.starts_with("copy")).unwrap();
        let delete_at = ops.iter().position(|op| op.starts_with("delete")).unwrap();
        assert!(copy_at < delete_at, "ops were: {ops:?}");
    }

    #[tokio::test]
    async fn copy_failure_leaves_source_untouched() {
        let store = Arc::new(MemoryObjectStore::with_object(
            "imports",
            "uploaded/items.csv",
            b"data",
        ));
        store.fail_copy.store(true, Ordering::SeqCst);

        let err = manager(store.clone())
            .finalize(&SourceObject::new("imports", "uploaded/items.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Copy(_)));
        assert!(store.contains("imports", "uploaded/items.csv"));
        assert!(!store.contains("imports", "parsed/items.csv"));
    }

    #[tokio::test]
    async fn missing_version_aborts_without_delete() {
        let store = Arc::new(MemoryObjectStore::with_object(
            "imports",
            "uploaded/items.csv",
            b"data",
        ));
        store.hide_versions.store(true, Ordering::SeqCst);

        let err = manager(store.clone())
            .finalize(&SourceObject::new("imports", "uploaded/items.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NoCurrentVersion { .. }));
        // Source still present: nothing was deleted blindly.
        assert!(store.contains("imports", "uploaded/items.csv"));
    }

    #[tokio::test]
    async fn keys_outside_incoming_prefix_are_refused() {
        let store = Arc::new(MemoryObjectStore::default());
        let err = manager(store)
            .finalize(&SourceObject::new("imports", "archive/items.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotIncoming(_)));
    }

    #[test]
    fn processed_key_substitutes_only_the_prefix() {
        let store = Arc::new(MemoryObjectStore::default());
        let manager = manager(store);
        assert_eq!(
            manager.processed_key("uploaded/2026/uploaded.csv").as_deref(),
            Some("parsed/2026/uploaded.csv")
        );
        assert_eq!(manager.processed_key("other/items.csv"), None);
    }
}
