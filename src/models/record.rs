//! A catalog record as it moves through the pipeline.
//!
//! A `RawRecord` is exactly the decoded file row: four string fields, no
//! interpretation. It stays raw on the queue — the JSON payload keeps the
//! original string values — and is only interpreted by [`RawRecord::accept`],
//! which validates the fields and assigns the generated product identifier.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One decoded data row, prior to validation.
///
/// All fields are kept as the strings read from the file so the queue payload
/// round-trips byte-for-byte through `serde_json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub title: String,
    pub description: String,
    pub price: String,
    pub count: String,
}

/// A record that passed validation and received its identifier.
///
/// Immutable once constructed; the id is generated at acceptance time and is
/// not derivable from the input.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub count: i64,
}

/// Permanent, non-retryable rejection of a raw record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title is required and must be non-empty")]
    MissingTitle,
    #[error("description is required and must be non-empty")]
    MissingDescription,
    #[error("price `{0}` is not a decimal number")]
    UnparsablePrice(String),
    #[error("price `{0}` must be greater than zero")]
    NonPositivePrice(String),
    #[error("count `{0}` is not an integer")]
    UnparsableCount(String),
    #[error("count `{0}` must not be negative")]
    NegativeCount(String),
}

impl ValidationError {
    /// Name of the field that failed, for log context.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingTitle => "title",
            Self::MissingDescription => "description",
            Self::UnparsablePrice(_) | Self::NonPositivePrice(_) => "price",
            Self::UnparsableCount(_) | Self::NegativeCount(_) => "count",
        }
    }
}

impl RawRecord {
    /// Validate the raw fields and mint an accepted record.
    ///
    /// Each call generates a fresh identifier, so re-accepting the same raw
    /// record (a redelivered queue message) produces a distinct entry rather
    /// than colliding with the earlier attempt.
    pub fn accept(&self) -> Result<AcceptedRecord, ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(ValidationError::MissingDescription);
        }

        let price: f64 = self
            .price
            .trim()
            .parse()
            .map_err(|_| ValidationError::UnparsablePrice(self.price.clone()))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ValidationError::NonPositivePrice(self.price.clone()));
        }

        let count: i64 = self
            .count
            .trim()
            .parse()
            .map_err(|_| ValidationError::UnparsableCount(self.count.clone()))?;
        if count < 0 {
            return Err(ValidationError::NegativeCount(self.count.clone()));
        }

        Ok(AcceptedRecord {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.to_string(),
            price,
            count,
        })
    }
}
