//! Represents an image registered with the service and the JSON shapes
//! exchanged over the `/images` endpoints.

use serde::{Deserialize, Serialize};

/// Content type recorded when the client does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata record for a single image.
///
/// The record is written once at creation and never updated. The object it
/// points at (`s3_key`) is uploaded separately by the client through a signed
/// URL, so a record may exist before (or without) its object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    /// Server-generated UUID v4, primary key.
    pub image_id: String,

    /// Owner of the image; backs the secondary index.
    pub user_id: String,

    /// Storage key `{user_id}/{image_id}/{filename}`.
    pub s3_key: String,

    /// Client-supplied file name.
    pub filename: String,

    /// Declared MIME type of the object.
    pub content_type: String,

    /// Free-form tags in client order.
    pub tags: Vec<String>,

    /// Free-text description, empty by default.
    pub description: String,

    /// Unix timestamp (seconds) of creation, server clock.
    pub created_at: i64,
}

impl ImageRecord {
    /// Build the storage key for an image.
    pub fn storage_key(user_id: &str, image_id: &str, filename: &str) -> String {
        format!("{user_id}/{image_id}/{filename}")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Body accepted by `POST /images`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateImageRequest {
    pub user_id: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Raw query string of `GET /images`; values are validated by the service.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListImagesQuery {
    pub user_id: Option<String>,
    pub tag: Option<String>,
    pub from_ts: Option<String>,
    pub to_ts: Option<String>,
    pub limit: Option<String>,
}

/// Response of `POST /images`.
#[derive(Debug, Serialize)]
pub struct CreateImageResponse {
    pub image_id: String,
    pub upload_url: String,
    pub s3_key: String,
}

/// A record together with its short-lived download link.
///
/// `download_url` is `null` in listings when the link could not be signed.
#[derive(Debug, Serialize)]
pub struct ImageView {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub download_url: Option<String>,
}

/// Response of `GET /images`.
#[derive(Debug, Serialize)]
pub struct ListImagesResponse {
    pub items: Vec<ImageView>,
}

/// Response of `DELETE /images/{image_id}`.
#[derive(Debug, Serialize)]
pub struct DeleteImageResponse {
    pub message: String,
    pub image_id: String,
}
