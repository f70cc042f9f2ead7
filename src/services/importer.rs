//! The producer pipeline: stream one source file, fan its rows out onto the
//! queue, then finalize the source object.
//!
//! Two explicit phases. Phase one streams the file to completion, publishing
//! rows with a bounded number of in-flight sends; phase two (finalize) runs
//! only after every publish has been acknowledged and none failed. That
//! structure is what enforces publish-before-finalize: there is no path to
//! the lifecycle manager while a send is outstanding.

use futures::{StreamExt, stream::FuturesUnordered};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use crate::models::object::SourceObject;
use crate::services::lifecycle::{LifecycleError, ObjectLifecycleManager};
use crate::services::object_store::{ObjectStore, StorageError};
use crate::services::publisher::{PublishError, QueuePublisher};
use crate::services::reader::{ReadError, RecordStreamReader, RowError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("opening source object: {0}")]
    Storage(#[from] StorageError),
    #[error("reading file header: {0}")]
    Open(#[from] ReadError),
    #[error("source stream aborted: {0}")]
    Stream(RowError),
    #[error("{failed} of {attempted} record publishes failed; finalize skipped")]
    PublishFailed { failed: usize, attempted: usize },
    #[error("finalizing source object: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Outcome of one successful import run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Valid data rows handed to the queue.
    pub rows_published: usize,
    /// Malformed rows skipped (logged, never retried).
    pub rows_skipped: usize,
}

/// Drives one source object through read → publish → finalize.
pub struct CatalogImporter {
    store: Arc<dyn ObjectStore>,
    publisher: QueuePublisher,
    lifecycle: ObjectLifecycleManager,
    publish_concurrency: usize,
}

impl CatalogImporter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        publisher: QueuePublisher,
        lifecycle: ObjectLifecycleManager,
        publish_concurrency: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            lifecycle,
            publish_concurrency: publish_concurrency.max(1),
        }
    }

    /// Import one source object end to end.
    ///
    /// Malformed rows are skipped and counted; a transport read error or any
    /// publish failure aborts with the object left in the incoming prefix so
    /// the trigger can replay it.
    pub async fn run(&self, source: &SourceObject) -> Result<ImportSummary, ImportError> {
        let (_meta, body) = self.store.get_reader(&source.bucket, &source.key).await?;
        let mut reader = RecordStreamReader::open(StreamReader::new(body)).await?;

        let mut in_flight = FuturesUnordered::new();
        let mut summary = ImportSummary::default();
        let mut attempted = 0usize;
        let mut failed = 0usize;

        loop {
            match reader.next_row().await {
                Ok(Some(record)) => {
                    attempted += 1;
                    let publisher = self.publisher.clone();
                    let line = reader.line();
                    in_flight.push(async move {
                        publisher.publish(&record).await.map_err(|err| (line, err))
                    });
                    // Keep reading while sends are in flight, but never hold
                    // more than the configured limit in memory.
                    if in_flight.len() >= self.publish_concurrency {
                        if let Some(result) = in_flight.next().await {
                            Self::settle(source, result, &mut summary, &mut failed);
                        }
                    }
                }
                Ok(None) => break,
                Err(err) if err.is_terminal() => {
                    warn!(
                        bucket = %source.bucket,
                        key = %source.key,
                        error = %err,
                        "source stream failed mid-file"
                    );
                    return Err(ImportError::Stream(err));
                }
                Err(err) => {
                    summary.rows_skipped += 1;
                    warn!(
                        bucket = %source.bucket,
                        key = %source.key,
                        error = %err,
                        "skipping malformed row"
                    );
                }
            }
        }

        // Drain every outstanding publish before considering finalize.
        while let Some(result) = in_flight.next().await {
            Self::settle(source, result, &mut summary, &mut failed);
        }

        if failed > 0 {
            return Err(ImportError::PublishFailed { failed, attempted });
        }

        self.lifecycle.finalize(source).await?;
        info!(
            bucket = %source.bucket,
            key = %source.key,
            rows_published = summary.rows_published,
            rows_skipped = summary.rows_skipped,
            "import finished"
        );
        Ok(summary)
    }

    fn settle(
        source: &SourceObject,
        result: Result<(), (u64, PublishError)>,
        summary: &mut ImportSummary,
        failed: &mut usize,
    ) {
        match result {
            Ok(()) => summary.rows_published += 1,
            Err((line, err)) => {
                *failed += 1;
                warn!(
                    bucket = %source.bucket,
                    key = %source.key,
                    line,
                    error = %err,
                    "record publish failed"
                );
            }
        }
    }
}
