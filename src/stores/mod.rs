//! Collaborator interfaces: the record store holding image metadata and the
//! object store holding image payloads.
//!
//! Both are trait objects constructed once at startup and injected into the
//! router state. Two implementations of each ship with the crate:
//!
//! - **local**: SQLite records (`sqlite_records`) and on-disk objects with
//!   HMAC-signed links served by this process (`local_objects`).
//! - **aws**: DynamoDB records (`dynamo_records`) and S3 objects
//!   (`s3_objects`).

use crate::models::image::ImageRecord;
use async_trait::async_trait;
use std::{fmt, io, time::Duration};
use thiserror::Error;

pub mod dynamo_records;
pub mod local_objects;
pub mod s3_objects;
pub mod signer;
pub mod sqlite_records;

/// Longest storage key accepted by the object stores.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("invalid table name `{0}`")]
    InvalidTableName(String),
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("failed to sign url: {0}")]
    Signing(String),
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operation a signed URL grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedMethod {
    Put,
    Get,
}

impl SignedMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SignedMethod::Put => "PUT",
            SignedMethod::Get => "GET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PUT" => Some(SignedMethod::Put),
            "GET" => Some(SignedMethod::Get),
            _ => None,
        }
    }
}

impl fmt::Display for SignedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed storage of image records with a secondary lookup by owner.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert (or overwrite) a record by `image_id`.
    async fn put(&self, record: &ImageRecord) -> StoreResult<()>;

    async fn get(&self, image_id: &str) -> StoreResult<Option<ImageRecord>>;

    /// Remove a record. Removing an absent id is not an error.
    async fn delete(&self, image_id: &str) -> StoreResult<()>;

    /// Up to `limit` records owned by `user_id`, in store order.
    async fn query_by_user(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ImageRecord>>;

    /// Up to `limit` records from an unfiltered scan, in store order.
    async fn scan(&self, limit: usize) -> StoreResult<Vec<ImageRecord>>;

    /// Cheap connectivity check used by the readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Blob storage addressed by key within one configured bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Produce a time-limited URL granting `method` on `key`.
    ///
    /// For `Put` the content type is bound to the upload; for `Get` it is
    /// the content type the download is served with.
    async fn presign(
        &self,
        method: SignedMethod,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StoreResult<String>;

    /// Remove an object. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Cheap connectivity check used by the readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Reject keys that would escape the bucket or cannot be addressed.
///
/// Empty keys, keys longer than [`MAX_OBJECT_KEY_LEN`], keys beginning with
/// `/`, keys containing a `..` segment, backslashes or control bytes are
/// refused.
pub fn validate_object_key(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == ".." || segment == ".")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\');

    if invalid {
        return Err(StoreError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}
