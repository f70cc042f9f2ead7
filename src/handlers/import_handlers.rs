//! Handlers for object upload and retrieval.
//!
//! `PUT` under the incoming prefix is the producer trigger: the body is
//! streamed into the object store, then the import pipeline runs for that
//! object before the response is sent, so a pipeline failure surfaces as an
//! error status and the platform (or operator) re-triggers by re-upload.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::json;
use std::io;
use tracing::info;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::object::SourceObject;

/// `PUT /{bucket}/{*key}` — store the object; run the import pipeline when
/// the key lies under the incoming prefix.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();

    let object = state
        .store
        .put_stream(&bucket, &key, content_type, stream)
        .await?;
    info!(bucket = %bucket, key = %key, version_id = %object.version_id, "object stored");

    if !key.starts_with(state.incoming_prefix.as_str()) {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "bucket": bucket,
                "key": key,
                "version_id": object.version_id,
                "etag": object.etag,
            })),
        ));
    }

    let summary = state
        .importer
        .run(&SourceObject::new(&bucket, &key))
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "bucket": bucket,
            "key": key,
            "etag": object.etag,
            "import": {
                "rows_published": summary.rows_published,
                "rows_skipped": summary.rows_skipped,
            },
        })),
    ))
}

/// `GET /{bucket}/{*key}` — stream the latest version back.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, stream) = state.store.get_reader(&bucket, &key).await?;

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    let content_type = meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&meta.size_bytes.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}
