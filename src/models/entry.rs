//! Persistence rows for accepted records.
//!
//! One accepted record becomes one `CatalogEntry` plus one `StockEntry`,
//! keyed by the same generated identifier. The two rows live in independent
//! tables and are written without a cross-table transaction.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::record::AcceptedRecord;

/// Catalog-side row: title, description and price.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
}

/// Stock-side row: available count for a catalog entry.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StockEntry {
    pub product_id: Uuid,
    pub count: i64,
}

impl From<&AcceptedRecord> for CatalogEntry {
    fn from(record: &AcceptedRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            description: record.description.clone(),
            price: record.price,
        }
    }
}

impl From<&AcceptedRecord> for StockEntry {
    fn from(record: &AcceptedRecord) -> Self {
        Self {
            product_id: record.id,
            count: record.count,
        }
    }
}
