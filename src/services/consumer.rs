//! The consumer stage: drain queue batches into the catalog and stock stores
//! and announce each accepted record.
//!
//! Outcomes are all-or-nothing per message: a message is only acked after its
//! catalog row, stock row and notification are all durably visible. Anything
//! transient retains the message for redelivery; anything permanent (bad
//! payload, failed validation) consumes it, because a retry can never
//! succeed. One message's fate never touches its batch-mates.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::entry::{CatalogEntry, StockEntry};
use crate::models::message::{MessageOutcome, MessageReport, QueuedMessage};
use crate::models::record::RawRecord;
use crate::services::queue::{QueueError, RecordQueue};
use crate::services::stores::{
    CatalogStore, CompletionNotifier, StockStore, StoreResult, completion_message,
};

/// Validates and persists the records carried by queue messages.
pub struct BatchConsumer {
    catalog: Arc<dyn CatalogStore>,
    stock: Arc<dyn StockStore>,
    notifier: Arc<dyn CompletionNotifier>,
    op_timeout: Duration,
}

impl BatchConsumer {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        stock: Arc<dyn StockStore>,
        notifier: Arc<dyn CompletionNotifier>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            stock,
            notifier,
            op_timeout,
        }
    }

    /// Process every message of one batch, concurrently and independently.
    pub async fn process_batch(&self, messages: &[QueuedMessage]) -> Vec<MessageReport> {
        join_all(messages.iter().map(|message| self.process_message(message))).await
    }

    async fn process_message(&self, message: &QueuedMessage) -> MessageReport {
        let report = |outcome, detail: Option<String>| MessageReport {
            message_id: message.id,
            receipt_handle: message.receipt_handle.clone(),
            outcome,
            detail,
        };

        // Structurally malformed payloads can never succeed on retry.
        let raw: RawRecord = match serde_json::from_str(&message.body) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    error = %err,
                    "undecodable payload; consuming message"
                );
                return report(MessageOutcome::Delete, Some(format!("bad payload: {err}")));
            }
        };

        let accepted = match raw.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    field = err.field(),
                    error = %err,
                    "record failed validation; consuming message"
                );
                return report(MessageOutcome::Delete, Some(format!("rejected: {err}")));
            }
        };

        // The three persistence sub-steps run sequentially for this message;
        // any transient failure leaves the message for redelivery.
        if let Some(detail) = self
            .transient("catalog write", self.catalog.insert(&CatalogEntry::from(&accepted)))
            .await
        {
            return report(MessageOutcome::Retain, Some(detail));
        }
        if let Some(detail) = self
            .transient("stock write", self.stock.insert(&StockEntry::from(&accepted)))
            .await
        {
            return report(MessageOutcome::Retain, Some(detail));
        }
        if let Some(detail) = self
            .transient(
                "notification",
                self.notifier.publish(&completion_message(&accepted.title)),
            )
            .await
        {
            return report(MessageOutcome::Retain, Some(detail));
        }

        info!(
            message_id = %message.id,
            product_id = %accepted.id,
            title = %accepted.title,
            "record persisted and announced"
        );
        report(MessageOutcome::Delete, None)
    }

    /// Run one sub-step under the bounded timeout; `Some(detail)` on failure.
    async fn transient(
        &self,
        step: &'static str,
        fut: impl Future<Output = StoreResult<()>>,
    ) -> Option<String> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                warn!(step, error = %err, "transient failure; message will be retained");
                Some(format!("{step} failed: {err}"))
            }
            Err(_) => {
                warn!(step, timeout = ?self.op_timeout, "sub-step timed out; message will be retained");
                Some(format!("{step} timed out"))
            }
        }
    }
}

/// Receive and process one batch; ack only `Delete` outcomes.
///
/// Returns the number of messages handled. A stale receipt on ack (the
/// message timed out and was redelivered meanwhile) is logged and tolerated.
pub async fn poll_once(
    queue: &dyn RecordQueue,
    consumer: &BatchConsumer,
    batch_size: usize,
) -> Result<usize, QueueError> {
    let batch = queue.receive(batch_size).await?;
    if batch.is_empty() {
        return Ok(0);
    }
    let handled = batch.len();
    for report in consumer.process_batch(&batch).await {
        match report.outcome {
            MessageOutcome::Delete => match queue.delete(&report.receipt_handle).await {
                Ok(()) => {}
                Err(QueueError::UnknownReceipt(_)) => {
                    warn!(
                        message_id = %report.message_id,
                        "receipt went stale before ack; message was redelivered"
                    );
                }
                Err(err) => return Err(err),
            },
            MessageOutcome::Retain => {
                debug!(
                    message_id = %report.message_id,
                    detail = report.detail.as_deref().unwrap_or(""),
                    "message retained for redelivery"
                );
            }
        }
    }
    Ok(handled)
}

/// The in-process consumer trigger: poll the queue forever.
pub async fn run_loop(
    queue: Arc<dyn RecordQueue>,
    consumer: Arc<BatchConsumer>,
    batch_size: usize,
    poll_interval: Duration,
) {
    loop {
        match poll_once(queue.as_ref(), consumer.as_ref(), batch_size).await {
            Ok(0) => tokio::time::sleep(poll_interval).await,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "queue poll failed; backing off");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
