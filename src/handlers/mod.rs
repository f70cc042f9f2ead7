//! HTTP boundary: shared state, the access-gate middleware, and the import
//! and health handlers.

pub mod health_handlers;
pub mod import_handlers;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};
use tracing::debug;

use crate::errors::AppError;
use crate::services::gate::{AccessGate, Effect};
use crate::services::importer::CatalogImporter;
use crate::services::object_store::ObjectStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub store: Arc<dyn ObjectStore>,
    pub importer: Arc<CatalogImporter>,
    pub gate: Arc<AccessGate>,
    pub storage_dir: PathBuf,
    pub incoming_prefix: String,
}

/// Gate middleware for the object routes.
///
/// Missing header → 401, structurally broken header → 400, wrong
/// credentials → 403. The distinction keeps a client-side typo diagnosable.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let resource = format!("{} {}", request.method(), request.uri().path());

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Some(header_value) = header_value else {
        let mut response =
            AppError::new(StatusCode::UNAUTHORIZED, "authorization required").into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"catalog-import\""),
        );
        return response;
    };

    match state.gate.authorize(header_value, &resource) {
        Ok(decision) if decision.effect == Effect::Allow => {
            debug!(principal = %decision.principal, resource = %decision.resource, "access allowed");
            next.run(request).await
        }
        Ok(decision) => {
            debug!(principal = %decision.principal, resource = %decision.resource, "access denied");
            AppError::new(StatusCode::FORBIDDEN, "access denied").into_response()
        }
        Err(err) => {
            AppError::new(StatusCode::BAD_REQUEST, format!("malformed authorization: {err}"))
                .into_response()
        }
    }
}
