//! In-memory doubles for the pipeline seams, shared by unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::models::message::QueuedMessage;
use crate::models::object::StoredObject;
use crate::services::object_store::{ByteStream, ObjectStore, StorageError, StorageResult};
use crate::services::queue::{QueueError, QueueResult, RecordQueue};

/// Object store double: one in-memory version per key, plus an operation log
/// so tests can assert ordering (copy before delete).
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), (String, Vec<u8>)>>,
    pub ops: Mutex<Vec<String>>,
    pub fail_copy: AtomicBool,
    pub hide_versions: AtomicBool,
}

impl MemoryObjectStore {
    pub fn with_object(bucket: &str, key: &str, bytes: &[u8]) -> Self {
        let store = Self::default();
        let version = Uuid::new_v4().to_string();
        store.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (version, bytes.to_vec()),
        );
        store
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn log(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn meta(bucket: &str, key: &str, version_id: &str, len: usize) -> StoredObject {
        StoredObject {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version_id.to_string(),
            content_type: None,
            size_bytes: len as i64,
            etag: String::new(),
            created_at: Utc::now(),
            is_latest: true,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        _content_type: Option<String>,
        mut stream: ByteStream,
    ) -> StorageResult<StoredObject> {
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        let version = Uuid::new_v4().to_string();
        self.log(format!("put {bucket}/{key}"));
        let meta = Self::meta(bucket, key, &version, bytes.len());
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), (version, bytes));
        Ok(meta)
    }

    async fn get_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(StoredObject, ByteStream)> {
        let objects = self.objects.lock().unwrap();
        let (version, bytes) = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        let meta = Self::meta(bucket, key, version, bytes.len());
        let body = stream::iter(vec![Ok(Bytes::from(bytes.clone()))]).boxed();
        Ok((meta, body))
    }

    async fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dest_key: &str,
    ) -> StorageResult<StoredObject> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("copy refused")));
        }
        let mut objects = self.objects.lock().unwrap();
        let (_, bytes) = objects
            .get(&(bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: src_key.to_string(),
            })?;
        let version = Uuid::new_v4().to_string();
        let meta = Self::meta(bucket, dest_key, &version, bytes.len());
        objects.insert((bucket.to_string(), dest_key.to_string()), (version, bytes));
        drop(objects);
        self.log(format!("copy {bucket}/{src_key} -> {bucket}/{dest_key}"));
        Ok(meta)
    }

    async fn latest_version(&self, bucket: &str, key: &str) -> StorageResult<Option<String>> {
        if self.hide_versions.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(version, _)| version.clone()))
    }

    async fn delete_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get(&(bucket.to_string(), key.to_string()));
        match entry {
            Some((version, _)) if version == version_id => {
                objects.remove(&(bucket.to_string(), key.to_string()));
                drop(objects);
                self.log(format!("delete {bucket}/{key}@{version_id}"));
                Ok(())
            }
            _ => Err(StorageError::VersionNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
                version_id: version_id.to_string(),
            }),
        }
    }
}

/// Queue double: collects sent bodies; can start failing after N sends.
#[derive(Default)]
pub struct MemoryQueue {
    pub sent: Mutex<Vec<String>>,
    sends_before_failure: Option<usize>,
    send_count: AtomicUsize,
}

impl MemoryQueue {
    pub fn failing_after(sends: usize) -> Self {
        Self {
            sends_before_failure: Some(sends),
            ..Default::default()
        }
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordQueue for MemoryQueue {
    async fn send(&self, body: &str) -> QueueResult<()> {
        let n = self.send_count.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.sends_before_failure {
            if n >= limit {
                return Err(QueueError::Sqlx(sqlx::Error::PoolClosed));
            }
        }
        self.sent.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn receive(&self, max: usize) -> QueueResult<Vec<QueuedMessage>> {
        let mut sent = self.sent.lock().unwrap();
        let take = sent.len().min(max);
        Ok(sent
            .drain(..take)
            .map(|body| QueuedMessage {
                id: Uuid::new_v4(),
                body,
                receipt_handle: Uuid::new_v4().to_string(),
            })
            .collect())
    }

    async fn delete(&self, _receipt_handle: &str) -> QueueResult<()> {
        Ok(())
    }
}
