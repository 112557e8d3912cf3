//! HTTP handlers for the `/images` endpoints.
//! Bodies, path segments and query strings are taken with their rejections
//! so that extractor failures come back as JSON errors rather than axum's
//! plain-text rejections.

use crate::{
    errors::AppError,
    models::image::{
        CreateImageResponse, DeleteImageResponse, ImageView, ListImagesQuery, ListImagesResponse,
    },
    services::image_service::{ImageService, ListFilter},
};
use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{BytesRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};

/// POST `/images`: register an image and return its upload link.
pub async fn create_image(
    State(service): State<ImageService>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<CreateImageResponse>), AppError> {
    let body = body.map_err(|rejection| {
        AppError::new(rejection.status(), "Invalid request body").with_detail(rejection.body_text())
    })?;
    let created = service.create(&body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET `/images`: list with `?user_id=&tag=&from_ts=&to_ts=&limit=`.
pub async fn list_images(
    State(service): State<ImageService>,
    query: Result<Query<ListImagesQuery>, QueryRejection>,
) -> Result<Json<ListImagesResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| {
        AppError::bad_request("Invalid query string").with_detail(rejection.body_text())
    })?;
    let filter = ListFilter::try_from(query)?;
    let items = service.list(&filter).await?;
    Ok(Json(ListImagesResponse { items }))
}

/// GET `/images/{image_id}`: one record with a download link.
pub async fn get_image(
    State(service): State<ImageService>,
    image_id: Result<Path<String>, PathRejection>,
) -> Result<Json<ImageView>, AppError> {
    let image_id = image_id_from(image_id)?;
    Ok(Json(service.get(&image_id).await?))
}

/// DELETE `/images/{image_id}`: remove the record and its object.
pub async fn delete_image(
    State(service): State<ImageService>,
    image_id: Result<Path<String>, PathRejection>,
) -> Result<Json<DeleteImageResponse>, AppError> {
    let image_id = image_id_from(image_id)?;
    service.delete(&image_id).await?;
    Ok(Json(DeleteImageResponse {
        message: "Deleted".into(),
        image_id,
    }))
}

/// An id that does not decode to UTF-8 cannot name a stored image.
fn image_id_from(path: Result<Path<String>, PathRejection>) -> Result<String, AppError> {
    path.map(|Path(image_id)| image_id).map_err(|rejection| {
        tracing::debug!("rejected image id: {}", rejection.body_text());
        AppError::not_found("Image not found")
    })
}

/// Fallback for every unmatched path or method.
pub async fn not_found() -> AppError {
    AppError::not_found("Not Found")
}
