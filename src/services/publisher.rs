//! Per-record fan-out onto the durable queue.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::record::RawRecord;
use crate::services::queue::{QueueError, RecordQueue};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("encoding record payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("queue send timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Sends one JSON-encoded message per raw record.
///
/// Each publish is independent: a failure is returned to the caller and never
/// blocks later records from the same file. Duplicate sends on retry are
/// acceptable under the consumer's at-least-once semantics.
#[derive(Clone)]
pub struct QueuePublisher {
    queue: Arc<dyn RecordQueue>,
    timeout: Duration,
}

impl QueuePublisher {
    pub fn new(queue: Arc<dyn RecordQueue>, timeout: Duration) -> Self {
        Self { queue, timeout }
    }

    /// Encode `record` and send it, bounded by the configured timeout.
    pub async fn publish(&self, record: &RawRecord) -> Result<(), PublishError> {
        let body = serde_json::to_string(record)?;
        match tokio::time::timeout(self.timeout, self.queue.send(&body)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }
}
