//! Signed upload/download endpoints for the local object store.
//! Streams object bodies to avoid buffering in memory; every request must
//! carry a link produced by `LocalObjectStore::presign`.

use crate::{
    app::AppState,
    errors::AppError,
    models::image::DEFAULT_CONTENT_TYPE,
    stores::{
        SignedMethod,
        local_objects::{BlobError, LocalObjectStore, SignedQuery},
    },
};
use axum::{
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

fn local_store(state: &AppState) -> Result<&LocalObjectStore, AppError> {
    state.blobs.as_ref().ok_or_else(|| AppError::not_found("Not Found"))
}

fn object_key(path: Result<Path<String>, PathRejection>) -> Result<String, AppError> {
    path.map(|Path(key)| key).map_err(|rejection| {
        AppError::bad_request("Invalid object key").with_detail(rejection.body_text())
    })
}

fn signed_query(query: Result<Query<SignedQuery>, QueryRejection>) -> Result<SignedQuery, AppError> {
    query
        .map(|Query(q)| q)
        .map_err(|rejection| {
            AppError::forbidden("Missing or malformed signature").with_detail(rejection.body_text())
        })
}

/// PUT `/blobs/{*key}`: store the request body under `key`.
pub async fn upload_blob(
    State(state): State<AppState>,
    key: Result<Path<String>, PathRejection>,
    query: Result<Query<SignedQuery>, QueryRejection>,
    body: Body,
) -> Result<Response, AppError> {
    let store = local_store(&state)?;
    let key = object_key(key)?;
    let query = signed_query(query)?;
    store.authorize(SignedMethod::Put, &key, &query, Utc::now().timestamp())?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let stored = store
        .write_stream(&key, stream)
        .await
        .map_err(BlobError::from)?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", stored.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// GET `/blobs/{*key}`: stream the object back.
pub async fn download_blob(
    State(state): State<AppState>,
    key: Result<Path<String>, PathRejection>,
    query: Result<Query<SignedQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let store = local_store(&state)?;
    let key = object_key(key)?;
    let query = signed_query(query)?;
    store.authorize(SignedMethod::Get, &key, &query, Utc::now().timestamp())?;

    let (file, len) = store.open(&key).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(
        response.headers_mut(),
        query.content_type.as_deref().filter(|ct| !ct.is_empty()),
        len,
    );
    Ok(response)
}

fn set_blob_headers(headers: &mut HeaderMap, content_type: Option<&str>, len: u64) {
    let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}
