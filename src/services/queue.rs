//! Durable at-least-once message queue behind the `RecordQueue` seam.
//!
//! `SqliteQueue` models the usual visibility-timeout contract: `receive`
//! hides a message for the visibility window and stamps a fresh receipt
//! handle; only a delete with the *current* receipt handle removes the row.
//! A message whose consumer never acked simply becomes visible again — that
//! redelivery is the sole recovery path, so duplicates are possible and
//! callers must tolerate them.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use crate::models::message::QueuedMessage;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The receipt handle does not match any message: either it was already
    /// deleted or the message timed out and was redelivered under a new
    /// handle. Tolerated by callers, but surfaced so they can log it.
    #[error("receipt handle `{0}` does not match any in-flight message")]
    UnknownReceipt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// The queue seam used by publisher and consumer.
#[async_trait]
pub trait RecordQueue: Send + Sync {
    /// Enqueue one message body. Durable once this returns.
    async fn send(&self, body: &str) -> QueueResult<()>;

    /// Receive up to `max` visible messages, hiding each for the visibility
    /// window. May return fewer, or none.
    async fn receive(&self, max: usize) -> QueueResult<Vec<QueuedMessage>>;

    /// Delete the message identified by `receipt_handle`.
    async fn delete(&self, receipt_handle: &str) -> QueueResult<()>;
}

/// SQLite-backed queue.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Arc<SqlitePool>,
    name: String,
    visibility: Duration,
}

impl SqliteQueue {
    pub fn new(db: Arc<SqlitePool>, name: impl Into<String>, visibility: Duration) -> Self {
        Self {
            db,
            name: name.into(),
            visibility,
        }
    }
}

#[async_trait]
impl RecordQueue for SqliteQueue {
    async fn send(&self, body: &str) -> QueueResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO queue_messages (id, queue, body, receipt_handle, enqueued_at,
                                         visible_at, receive_count)
             VALUES (?, ?, ?, NULL, ?, ?, 0)",
        )
        .bind(Uuid::new_v4())
        .bind(&self.name)
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn receive(&self, max: usize) -> QueueResult<Vec<QueuedMessage>> {
        let now = Utc::now();
        let hidden_until = now
            + ChronoDuration::from_std(self.visibility)
                .unwrap_or_else(|_| ChronoDuration::seconds(30));

        let mut tx = self.db.begin().await?;
        let candidates = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, body FROM queue_messages
             WHERE queue = ? AND visible_at <= ?
             ORDER BY enqueued_at ASC
             LIMIT ?",
        )
        .bind(&self.name)
        .bind(now)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut batch = Vec::with_capacity(candidates.len());
        for (id, body) in candidates {
            let receipt_handle = Uuid::new_v4().to_string();
            let claimed = sqlx::query(
                "UPDATE queue_messages
                 SET receipt_handle = ?, visible_at = ?, receive_count = receive_count + 1
                 WHERE id = ? AND visible_at <= ?",
            )
            .bind(&receipt_handle)
            .bind(hidden_until)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if claimed.rows_affected() == 1 {
                batch.push(QueuedMessage {
                    id,
                    body,
                    receipt_handle,
                });
            }
        }
        tx.commit().await?;
        Ok(batch)
    }

    async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE receipt_handle = ?")
            .bind(receipt_handle)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn queue_with_visibility(visibility: Duration) -> SqliteQueue {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        SqliteQueue::new(Arc::new(pool), "catalog-items", visibility)
    }

    #[tokio::test]
    async fn send_receive_delete() {
        let queue = queue_with_visibility(Duration::from_secs(30)).await;
        queue.send("one").await.unwrap();
        queue.send("two").await.unwrap();

        let batch = queue.receive(5).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "one");

        for message in &batch {
            queue.delete(&message.receipt_handle).await.unwrap();
        }
        assert!(queue.receive(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn received_messages_are_hidden_until_timeout() {
        let queue = queue_with_visibility(Duration::from_millis(50)).await;
        queue.send("payload").await.unwrap();

        let first = queue.receive(5).await.unwrap();
        assert_eq!(first.len(), 1);
        // Hidden while the visibility window is open.
        assert!(queue.receive(5).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let redelivered = queue.receive(5).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].id, first[0].id);
        // Redelivery carries a fresh receipt handle; the old one is stale.
        assert_ne!(redelivered[0].receipt_handle, first[0].receipt_handle);
        assert!(matches!(
            queue.delete(&first[0].receipt_handle).await,
            Err(QueueError::UnknownReceipt(_))
        ));
    }

    #[tokio::test]
    async fn receive_respects_batch_cap() {
        let queue = queue_with_visibility(Duration::from_secs(30)).await;
        for i in 0..8 {
            queue.send(&format!("m{i}")).await.unwrap();
        }
        let batch = queue.receive(5).await.unwrap();
        assert_eq!(batch.len(), 5);
    }

    #[tokio::test]
    async fn delete_with_unknown_receipt_fails() {
        let queue = queue_with_visibility(Duration::from_secs(30)).await;
        assert!(matches!(
            queue.delete("bogus").await,
            Err(QueueError::UnknownReceipt(_))
        ));
    }
}
