//! Application wiring: builds the collaborator clients named by the
//! configuration once at startup and injects them into the router state.

use crate::{
    config::{AppConfig, Backend},
    services::image_service::ImageService,
    stores::{
        ObjectStore, RecordStore, dynamo_records::DynamoRecordStore,
        local_objects::LocalObjectStore, s3_objects::S3ObjectStore, signer::UrlSigner,
        sqlite_records::SqliteRecordStore,
    },
};
use anyhow::{Context, Result};
use axum::extract::FromRef;
use std::{fs, path::Path, sync::Arc};
use uuid::Uuid;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub images: ImageService,
    /// Present only when the local object store serves its own signed links.
    pub blobs: Option<LocalObjectStore>,
}

impl AppState {
    pub fn new(images: ImageService, blobs: Option<LocalObjectStore>) -> Self {
        Self { images, blobs }
    }
}

impl FromRef<AppState> for ImageService {
    fn from_ref(state: &AppState) -> Self {
        state.images.clone()
    }
}

/// Construct the record and object stores selected by `cfg`.
pub async fn build_state(cfg: &AppConfig) -> Result<AppState> {
    match cfg.backend {
        Backend::Local => {
            let records = connect_sqlite(cfg).await?;
            let objects = local_object_store(cfg)?;
            let images = ImageService::new(Arc::new(records), Arc::new(objects.clone()));
            Ok(AppState::new(images, Some(objects)))
        }
        Backend::Aws => {
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let dynamodb = aws_sdk_dynamodb::Client::new(&sdk_config);
            let s3 = aws_sdk_s3::Client::new(&sdk_config);

            let records: Arc<dyn RecordStore> = Arc::new(DynamoRecordStore::new(
                dynamodb,
                cfg.table.clone(),
                cfg.user_index.clone(),
            ));
            let objects: Arc<dyn ObjectStore> =
                Arc::new(S3ObjectStore::new(s3, cfg.bucket.clone()));
            tracing::info!(
                "Using DynamoDB table `{}` and S3 bucket `{}`",
                cfg.table,
                cfg.bucket
            );
            Ok(AppState::new(ImageService::new(records, objects), None))
        }
    }
}

/// Open the SQLite record store, creating the database directory and the
/// schema when missing.
pub async fn connect_sqlite(cfg: &AppConfig) -> Result<SqliteRecordStore> {
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.contains(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    SqliteRecordStore::connect(&cfg.database_url, &cfg.table)
        .await
        .with_context(|| format!("opening record store at {}", cfg.database_url))
}

fn local_object_store(cfg: &AppConfig) -> Result<LocalObjectStore> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let secret = match &cfg.signing_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!(
                "No signing secret configured; signed links will not survive a restart"
            );
            Uuid::new_v4().to_string()
        }
    };

    Ok(LocalObjectStore::new(
        &cfg.storage_dir,
        cfg.bucket.clone(),
        cfg.blob_link_base(),
        UrlSigner::new(secret),
    ))
}
