//! src/services/image_service.rs
//!
//! ImageService: the four image operations on top of the injected record and
//! object stores. Handlers only translate HTTP in and out; validation,
//! filtering and the best-effort cleanup policy live here.

use crate::{
    models::image::{
        CreateImageRequest, CreateImageResponse, DEFAULT_CONTENT_TYPE, ImageRecord, ImageView,
        ListImagesQuery,
    },
    stores::{ObjectStore, RecordStore, SignedMethod, StoreError, validate_object_key},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifetime of the link returned by create.
pub const UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);
/// Lifetime of the links attached by get and list.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

fn store_failure(context: &'static str) -> impl FnOnce(StoreError) -> ServiceError {
    move |source| ServiceError::Store { context, source }
}

/// Validated listing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub user_id: Option<String>,
    pub tag: Option<String>,
    pub from_ts: Option<i64>,
    pub to_ts: Option<i64>,
    pub limit: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            tag: None,
            from_ts: None,
            to_ts: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl TryFrom<ListImagesQuery> for ListFilter {
    type Error = ServiceError;

    /// Empty values count as absent. `limit` must be a positive integer and
    /// is clamped to [`MAX_LIST_LIMIT`]; timestamps must be integers.
    fn try_from(query: ListImagesQuery) -> Result<Self, Self::Error> {
        let limit = match non_empty(query.limit) {
            None => DEFAULT_LIST_LIMIT,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n.min(MAX_LIST_LIMIT),
                _ => {
                    return Err(ServiceError::BadRequest(
                        "limit must be a positive integer".into(),
                    ));
                }
            },
        };

        let parse_ts = |raw: Option<String>| -> ServiceResult<Option<i64>> {
            non_empty(raw)
                .map(|value| value.parse::<i64>())
                .transpose()
                .map_err(|_| ServiceError::BadRequest("from_ts and to_ts must be integers".into()))
        };

        Ok(Self {
            user_id: non_empty(query.user_id),
            tag: non_empty(query.tag),
            from_ts: parse_ts(query.from_ts)?,
            to_ts: parse_ts(query.to_ts)?,
            limit,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Keep records carrying `filter.tag` (exact match), then those whose
/// `created_at` lies within the inclusive `[from_ts, to_ts]` range.
pub fn apply_filters(records: Vec<ImageRecord>, filter: &ListFilter) -> Vec<ImageRecord> {
    records
        .into_iter()
        .filter(|record| match &filter.tag {
            Some(tag) => record.has_tag(tag),
            None => true,
        })
        .filter(|record| filter.from_ts.is_none_or(|from| record.created_at >= from))
        .filter(|record| filter.to_ts.is_none_or(|to| record.created_at <= to))
        .collect()
}

/// ImageService owns the store handles shared by every request.
#[derive(Clone)]
pub struct ImageService {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
}

impl ImageService {
    pub fn new(records: Arc<dyn RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { records, objects }
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    /// Register an image and hand back a link the client uploads to.
    ///
    /// An empty body is treated as `{}`. The record is written before the
    /// link is signed; nothing is written to the object store.
    pub async fn create(&self, body: &[u8]) -> ServiceResult<CreateImageResponse> {
        let payload: CreateImageRequest = if body.is_empty() {
            CreateImageRequest::default()
        } else {
            serde_json::from_slice(body)
                .map_err(|_| ServiceError::BadRequest("Invalid JSON".into()))?
        };

        let (user_id, filename) = match (non_empty(payload.user_id), non_empty(payload.filename))
        {
            (Some(user_id), Some(filename)) => (user_id, filename),
            _ => {
                return Err(ServiceError::BadRequest(
                    "user_id and filename are required".into(),
                ));
            }
        };

        let image_id = Uuid::new_v4().to_string();
        let s3_key = ImageRecord::storage_key(&user_id, &image_id, &filename);
        validate_object_key(&s3_key).map_err(|_| {
            ServiceError::BadRequest("user_id and filename must form a valid storage key".into())
        })?;

        let record = ImageRecord {
            image_id: image_id.clone(),
            user_id,
            s3_key: s3_key.clone(),
            filename,
            content_type: payload
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            tags: payload.tags.unwrap_or_default(),
            description: payload.description.unwrap_or_default(),
            created_at: Utc::now().timestamp(),
        };

        self.records
            .put(&record)
            .await
            .map_err(store_failure("Failed to create image"))?;

        let upload_url = self
            .objects
            .presign(
                SignedMethod::Put,
                &s3_key,
                Some(record.content_type.as_str()),
                UPLOAD_URL_TTL,
            )
            .await
            .map_err(store_failure("Failed to create upload URL"))?;

        info!(%image_id, user_id = %record.user_id, %s3_key, "created image");
        Ok(CreateImageResponse {
            image_id,
            upload_url,
            s3_key,
        })
    }

    /// Fetch up to `filter.limit` records, then filter in memory.
    ///
    /// The limit bounds the fetch, not the result, so a filtered page can
    /// hold fewer than `limit` items even when more would match. Links that
    /// fail to sign are reported as `None` instead of failing the listing.
    pub async fn list(&self, filter: &ListFilter) -> ServiceResult<Vec<ImageView>> {
        let fetched = match &filter.user_id {
            Some(user_id) => self.records.query_by_user(user_id, filter.limit).await,
            None => self.records.scan(filter.limit).await,
        }
        .map_err(store_failure("Failed to list images"))?;

        let fetched_count = fetched.len();
        let records = apply_filters(fetched, filter);
        debug!(fetched_count, kept = records.len(), "listed images");

        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let download_url = match self.download_url(&record).await {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(image_id = %record.image_id, "could not sign download url: {}", err);
                    None
                }
            };
            items.push(ImageView {
                record,
                download_url,
            });
        }
        Ok(items)
    }

    pub async fn get(&self, image_id: &str) -> ServiceResult<ImageView> {
        let record = self.fetch(image_id, "Failed to fetch image").await?;
        let download_url = self
            .download_url(&record)
            .await
            .map_err(store_failure("Failed to fetch image"))?;
        Ok(ImageView {
            record,
            download_url: Some(download_url),
        })
    }

    /// Remove the object (best effort) and then the record.
    ///
    /// A failed object deletion is logged and otherwise ignored so the
    /// record is always removed once it has been found.
    pub async fn delete(&self, image_id: &str) -> ServiceResult<()> {
        let record = self.fetch(image_id, "Failed to delete image").await?;

        if let Err(err) = self.objects.delete(&record.s3_key).await {
            warn!(
                %image_id,
                s3_key = %record.s3_key,
                "object deletion failed, removing record anyway: {}",
                err
            );
        }

        self.records
            .delete(image_id)
            .await
            .map_err(store_failure("Failed to delete image"))?;

        info!(%image_id, "deleted image");
        Ok(())
    }

    async fn fetch(&self, image_id: &str, context: &'static str) -> ServiceResult<ImageRecord> {
        self.records
            .get(image_id)
            .await
            .map_err(store_failure(context))?
            .ok_or_else(|| ServiceError::NotFound("Image not found".into()))
    }

    async fn download_url(&self, record: &ImageRecord) -> Result<String, StoreError> {
        self.objects
            .presign(
                SignedMethod::Get,
                &record.s3_key,
                Some(record.content_type.as_str()),
                DOWNLOAD_URL_TTL,
            )
            .await
    }
}
