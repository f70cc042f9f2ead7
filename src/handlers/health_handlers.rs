//! Liveness and readiness probes.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

use crate::handlers::AppState;

#[derive(Serialize)]
struct ProbeReport {
    status: &'static str,
    /// Failure detail per probe; absent when the probe passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk: Option<String>,
}

/// `GET /healthz` — cheap liveness, no I/O.
pub async fn healthz() -> impl IntoResponse {
    Json(ProbeReport {
        status: "ok",
        database: None,
        disk: None,
    })
}

/// `GET /readyz` — verifies the metadata database answers and the payload
/// directory is writable. 503 when either probe fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let database = probe_database(&state.db).await.err();
    let disk = probe_disk(&state.storage_dir).await.err();

    let healthy = database.is_none() && disk.is_none();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ProbeReport {
            status: if healthy { "ok" } else { "error" },
            database,
            disk,
        }),
    )
}

async fn probe_database(db: &SqlitePool) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => Ok(()),
        Ok(other) => Err(format!("unexpected probe result: {other}")),
        Err(err) => Err(err.to_string()),
    }
}

async fn probe_disk(dir: &Path) -> Result<(), String> {
    let probe_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&probe_path, b"probe")
        .await
        .map_err(|err| format!("write failed: {err}"))?;
    let read_back = fs::read(&probe_path)
        .await
        .map_err(|err| format!("read failed: {err}"));
    let _ = fs::remove_file(&probe_path).await;
    match read_back {
        Ok(bytes) if bytes == b"probe" => Ok(()),
        Ok(_) => Err("probe file content mismatch".into()),
        Err(err) => Err(err),
    }
}
