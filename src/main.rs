use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use handlers::AppState;
use services::consumer::BatchConsumer;
use services::gate::AccessGate;
use services::importer::CatalogImporter;
use services::lifecycle::ObjectLifecycleManager;
use services::object_store::{LocalObjectStore, ObjectStore};
use services::publisher::QueuePublisher;
use services::queue::{RecordQueue, SqliteQueue};
use services::stores::{SqliteCatalogStore, SqliteNotifier, SqliteStockStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!("starting catalog-import on {}", cfg.addr());

    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!(dir = %cfg.storage_dir, "created storage directory");
    }

    let db = Arc::new(open_database(&cfg.database_url).await?);

    if migrate {
        run_migrations(&db).await?;
        tracing::info!("migrations applied");
        return Ok(());
    }

    // --- Wire the pipeline ---
    let store: Arc<dyn ObjectStore> =
        Arc::new(LocalObjectStore::new(db.clone(), cfg.storage_dir.clone()));
    let queue: Arc<dyn RecordQueue> = Arc::new(SqliteQueue::new(
        db.clone(),
        cfg.queue_name.clone(),
        cfg.visibility(),
    ));

    let publisher = QueuePublisher::new(queue.clone(), cfg.op_timeout());
    let lifecycle = ObjectLifecycleManager::new(
        store.clone(),
        cfg.incoming_prefix.clone(),
        cfg.processed_prefix.clone(),
    );
    let importer = Arc::new(CatalogImporter::new(
        store.clone(),
        publisher,
        lifecycle,
        cfg.publish_concurrency,
    ));

    let catalog = Arc::new(SqliteCatalogStore::new(db.clone(), cfg.catalog_table.clone())?);
    let stock = Arc::new(SqliteStockStore::new(db.clone(), cfg.stock_table.clone())?);
    let notifier = Arc::new(SqliteNotifier::new(db.clone(), cfg.topic.clone())?);
    let consumer = Arc::new(BatchConsumer::new(
        catalog,
        stock,
        notifier,
        cfg.op_timeout(),
    ));

    tokio::spawn(services::consumer::run_loop(
        queue.clone(),
        consumer,
        cfg.batch_size,
        std::time::Duration::from_secs(1),
    ));

    let state = AppState {
        db: db.clone(),
        store,
        importer,
        gate: Arc::new(AccessGate::new(cfg.credentials.clone())),
        storage_dir: cfg.storage_dir.clone().into(),
        incoming_prefix: cfg.incoming_prefix.clone(),
    };
    let app = routes::routes::routes(state);

    let listener = bind_listener(&cfg).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite pool, creating the database file first since SQLx
/// will not create it on its own.
async fn open_database(url: &str) -> Result<sqlx::SqlitePool> {
    let db_path = url.trim_start_matches("sqlite://").trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    if let Err(err) = fs::OpenOptions::new().create(true).write(true).open(db_path) {
        tracing::warn!(path = db_path, "could not pre-create database file: {err}");
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Bind the configured address, stepping down to loopback when the
/// wildcard bind is refused (common in sandboxed environments).
async fn bind_listener(cfg: &config::AppConfig) -> Result<TcpListener> {
    let addr = cfg.addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!("bind to {addr} refused ({err}); retrying on {fallback}");
            Ok(TcpListener::bind(&fallback).await?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Apply the schema, one statement at a time. The migration file is
/// compiled in so the binary can migrate from any working directory.
async fn run_migrations(db: &sqlx::SqlitePool) -> Result<()> {
    let sql = include_str!("../migrations/0001_init.sql");
    for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}
