//! Queue delivery types.

use uuid::Uuid;

/// One delivered queue message: an opaque body plus the receipt handle that
/// acknowledges this particular delivery. A redelivery of the same message
/// carries a different receipt handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub body: String,
    pub receipt_handle: String,
}

/// What the consumer decided for one message.
///
/// `Delete` means the message's effects are durably visible (or the message
/// is permanently unprocessable) and it must be removed from the queue.
/// `Retain` leaves it for redelivery after the visibility timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    Delete,
    Retain,
}

/// Per-message result of one batch, reported back to the queue runner.
#[derive(Clone, Debug)]
pub struct MessageReport {
    pub message_id: Uuid,
    pub receipt_handle: String,
    pub outcome: MessageOutcome,
    /// Human-readable reason when the message was rejected or retained.
    pub detail: Option<String>,
}
