//! Persistence and notification seams for the consumer, with SQLite-backed
//! production adapters.
//!
//! Catalog and stock are deliberately independent targets keyed by the same
//! generated id; there is no cross-store transaction, and the consumer's
//! all-or-nothing message outcome is what bounds the inconsistency window.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::entry::{CatalogEntry, StockEntry};

/// Adapter failures are transient by construction: validation happened
/// upstream, so whatever fails here is worth a redelivery.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid identifier `{0}` for a table or topic name")]
    InvalidIdent(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert(&self, entry: &CatalogEntry) -> StoreResult<()>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    async fn insert(&self, entry: &StockEntry) -> StoreResult<()>;
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn publish(&self, message: &str) -> StoreResult<()>;
}

/// One plain-text completion notification per accepted record.
pub fn completion_message(title: &str) -> String {
    format!("A new product has been created: {title}")
}

/// Table/topic names come from configuration and are spliced into SQL, so
/// hold them to a strict identifier charset at construction time.
fn ensure_ident(name: &str) -> StoreResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidIdent(name.to_string()))
    }
}

#[derive(Clone)]
pub struct SqliteCatalogStore {
    db: Arc<SqlitePool>,
    table: String,
}

impl SqliteCatalogStore {
    pub fn new(db: Arc<SqlitePool>, table: impl Into<String>) -> StoreResult<Self> {
        let table = table.into();
        ensure_ident(&table)?;
        Ok(Self { db, table })
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn insert(&self, entry: &CatalogEntry) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (id, title, description, price) VALUES (?, ?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(entry.id)
            .bind(&entry.title)
            .bind(&entry.description)
            .bind(entry.price)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SqliteStockStore {
    db: Arc<SqlitePool>,
    table: String,
}

impl SqliteStockStore {
    pub fn new(db: Arc<SqlitePool>, table: impl Into<String>) -> StoreResult<Self> {
        let table = table.into();
        ensure_ident(&table)?;
        Ok(Self { db, table })
    }
}

#[async_trait]
impl StockStore for SqliteStockStore {
    async fn insert(&self, entry: &StockEntry) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (product_id, count) VALUES (?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(entry.product_id)
            .bind(entry.count)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

/// Notification "topic" backed by an append-only table; downstream
/// subscribers poll it.
#[derive(Clone)]
pub struct SqliteNotifier {
    db: Arc<SqlitePool>,
    topic: String,
}

impl SqliteNotifier {
    pub fn new(db: Arc<SqlitePool>, topic: impl Into<String>) -> StoreResult<Self> {
        let topic = topic.into();
        ensure_ident(&topic)?;
        Ok(Self { db, topic })
    }
}

#[async_trait]
impl CompletionNotifier for SqliteNotifier {
    async fn publish(&self, message: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notifications (id, topic, message, published_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(&self.topic)
        .bind(message)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}
