//! Core data models for the catalog import pipeline.
//!
//! `RawRecord` is the wire shape of one parsed file row; acceptance turns it
//! into an `AcceptedRecord` carrying a generated identifier, which maps onto
//! the `CatalogEntry`/`StockEntry` persistence rows via `sqlx::FromRow`.

pub mod entry;
pub mod message;
pub mod object;
pub mod record;
