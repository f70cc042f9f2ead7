//! Route table.
//!
//! - `GET  /healthz` / `GET /readyz` — probes, unauthenticated
//! - `PUT  /{bucket}/{*key}` — store an object; keys under the incoming
//!   prefix trigger the import pipeline (gated)
//! - `GET  /{bucket}/{*key}` — stream the latest version back (gated)
//!
//! The wildcard `*key` allows nested keys like `uploaded/2026/items.csv`.

use axum::{
    Router, middleware,
    routing::{get, put},
};

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    import_handlers::{get_object, upload_object},
    require_auth,
};

/// Build the full router over the shared state.
pub fn routes(state: AppState) -> Router {
    let objects = Router::new()
        .route("/{bucket}/{*key}", put(upload_object).get(get_object))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(objects)
        .with_state(state)
}
