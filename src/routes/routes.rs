//! Defines routes for the image registry.
//!
//! ## Structure
//! - **Image endpoints** (under the optional base path, e.g. `/prod`)
//!   - `POST   /images`            : create record, return upload link
//!   - `GET    /images`            : list (user_id, tag, from_ts, to_ts, limit)
//!   - `GET    /images/{image_id}` : fetch one with a download link
//!   - `DELETE /images/{image_id}` : delete record and object
//!
//! - **Signed blob endpoints** (local object store only)
//!   - `PUT    /blobs/{*key}`: upload through a signed link
//!   - `GET    /blobs/{*key}`: download through a signed link
//!
//! - **Health** (always at the root): `/healthz`, `/readyz`
//!
//! Anything else, including a known path with an unsupported method, answers
//! 404 `{"message": "Not Found"}`.

use crate::{
    app::AppState,
    handlers::{
        blob_handlers::{download_blob, upload_blob},
        health_handlers::{healthz, readyz},
        image_handlers::{create_image, delete_image, get_image, list_images, not_found},
    },
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the complete router with its state attached.
///
/// `base_path` is either empty or a `/`-prefixed path without a trailing
/// slash; the image and blob routes are nested beneath it.
pub fn routes(state: AppState, base_path: &str) -> Router {
    let mut api = Router::new()
        .route(
            "/images",
            post(create_image).get(list_images).fallback(not_found),
        )
        .route(
            "/images/{image_id}",
            get(get_image).delete(delete_image).fallback(not_found),
        );

    if state.blobs.is_some() {
        api = api.route(
            "/blobs/{*key}",
            put(upload_blob).get(download_blob).fallback(not_found),
        );
    }

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    let router = if base_path.is_empty() {
        router.merge(api)
    } else {
        router.nest(base_path, api)
    };

    router.fallback(not_found).with_state(state)
}
