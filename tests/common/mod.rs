//! Shared test server for the HTTP integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use image_registry::app::AppState;
use image_registry::routes::routes::routes;
use image_registry::services::image_service::ImageService;
use image_registry::stores::local_objects::LocalObjectStore;
use image_registry::stores::signer::UrlSigner;
use image_registry::stores::sqlite_records::SqliteRecordStore;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TEST_BUCKET: &str = "test-bucket";
pub const TEST_TABLE: &str = "test-table";

/// A test server instance backed by in-memory SQLite and a temp directory.
pub struct TestServer {
    /// The address the server is listening on.
    pub addr: SocketAddr,
    /// Route prefix the image endpoints are mounted under.
    pub base_path: String,
    /// HTTP client for talking to the server.
    pub client: reqwest::Client,
    _handle: JoinHandle<()>,
    _shutdown_tx: oneshot::Sender<()>,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Start a new test server with the image routes at the root.
    pub async fn start() -> Self {
        Self::start_with_base_path("").await
    }

    /// Start a new test server with the image routes under `base_path`.
    pub async fn start_with_base_path(base_path: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let objects_dir = temp_dir.path().join("objects");
        std::fs::create_dir_all(&objects_dir).expect("Failed to create objects dir");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let records = SqliteRecordStore::connect("sqlite::memory:", TEST_TABLE)
            .await
            .expect("Failed to open record store");
        let objects = LocalObjectStore::new(
            objects_dir,
            TEST_BUCKET,
            format!("http://{addr}{base_path}/blobs"),
            UrlSigner::new("integration-secret"),
        );
        let images = ImageService::new(Arc::new(records), Arc::new(objects.clone()));
        let app = routes(AppState::new(images, Some(objects)), base_path);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            base_path: base_path.to_string(),
            client: reqwest::Client::new(),
            _handle: handle,
            _shutdown_tx: shutdown_tx,
            _temp_dir: temp_dir,
        }
    }

    /// Absolute URL for a path under the image routes.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}{}", self.addr, self.base_path, path)
    }

    /// Absolute URL for a path at the server root.
    pub fn root_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST `/images` and return the status and parsed body.
    pub async fn create(&self, body: Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .post(self.url("/images"))
            .json(&body)
            .send()
            .await
            .expect("create request");
        let status = resp.status();
        (status, resp.json().await.expect("create body"))
    }

    /// GET a URL and return the status and parsed JSON body.
    pub async fn get_json(&self, url: &str) -> (reqwest::StatusCode, Value) {
        let resp = self.client.get(url).send().await.expect("get request");
        let status = resp.status();
        (status, resp.json().await.expect("json body"))
    }

    /// DELETE a URL and return the status and parsed JSON body.
    pub async fn delete_json(&self, url: &str) -> (reqwest::StatusCode, Value) {
        let resp = self.client.delete(url).send().await.expect("delete request");
        let status = resp.status();
        (status, resp.json().await.expect("json body"))
    }
}
