//! LocalObjectStore: on-disk object payloads with HMAC-signed links.
//!
//! Objects live beneath `base_path/{bucket}/{shard}/{shard}/{key}`, where the
//! two shard levels come from MD5(bucket/key). Signed links point back at this
//! process (`{link_base}/{key}?...`) and are checked by the blob handlers
//! before any bytes move.

use super::{
    ObjectStore, SignedMethod, StoreError, StoreResult,
    signer::{SignedFields, UrlSigner},
    validate_object_key,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Characters left unescaped in key segments and query values.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Query string carried by every signed link.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedQuery {
    pub bucket: String,
    pub method: String,
    pub expires: i64,
    pub content_type: Option<String>,
    pub signature: String,
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub etag: String,
    pub size_bytes: i64,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Request has expired")]
    Expired,
    #[error("Signature does not match")]
    SignatureMismatch,
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,
    bucket: String,
    /// Absolute URL prefix the blob routes are reachable at, without a
    /// trailing slash (e.g. `http://127.0.0.1:3000/blobs`).
    link_base: String,
    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        link_base: impl Into<String>,
        signer: UrlSigner,
    ) -> Self {
        let link_base: String = link_base.into();
        Self {
            base_path: base_path.into(),
            bucket: bucket.into(),
            link_base: link_base.trim_end_matches('/').to_string(),
            signer,
        }
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{bucket}/{key}"));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Check that `query` is a valid, unexpired link for `method` on `key`.
    pub fn authorize(
        &self,
        method: SignedMethod,
        key: &str,
        query: &SignedQuery,
        now: i64,
    ) -> Result<(), BlobError> {
        validate_object_key(key)?;

        if query.bucket != self.bucket || SignedMethod::parse(&query.method) != Some(method) {
            return Err(BlobError::SignatureMismatch);
        }

        let fields = SignedFields {
            method,
            bucket: &self.bucket,
            key,
            expires: query.expires,
            content_type: query.content_type.as_deref().unwrap_or(""),
        };
        if !self.signer.verify(&fields, &query.signature) {
            return Err(BlobError::SignatureMismatch);
        }
        if now > query.expires {
            return Err(BlobError::Expired);
        }
        Ok(())
    }

    /// Stream an upload to disk.
    ///
    /// Bytes go to a temporary file next to the final location, are fsynced,
    /// then renamed into place so readers never observe a partial object.
    /// The temporary file is removed on any error.
    pub async fn write_stream<S>(&self, key: &str, stream: S) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        validate_object_key(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other(
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = place_file(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        debug!(key, size_bytes, %etag, "stored object");
        Ok(StoredObject { etag, size_bytes })
    }

    /// Open an object for streaming out, with its length in bytes.
    pub async fn open(&self, key: &str) -> Result<(File, u64), BlobError> {
        validate_object_key(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Store(StoreError::Io(err))
            }
        })?;
        let len = file.metadata().await.map_err(StoreError::Io)?.len();
        Ok((file, len))
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    ///
    /// Stops at the first non-empty or missing directory, or on any other
    /// I/O error.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn presign(
        &self,
        method: SignedMethod,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StoreResult<String> {
        validate_object_key(key)?;

        let ttl = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        let content_type = content_type.unwrap_or("");
        let signature = self.signer.sign(&SignedFields {
            method,
            bucket: &self.bucket,
            key,
            expires,
            content_type,
        })?;

        let mut url = format!(
            "{}/{}?bucket={}&method={}&expires={}",
            self.link_base,
            encode_key(key),
            utf8_percent_encode(&self.bucket, UNRESERVED),
            method,
            expires
        );
        if !content_type.is_empty() {
            url.push_str("&content_type=");
            url.extend(utf8_percent_encode(content_type, UNRESERVED));
        }
        url.push_str("&signature=");
        url.push_str(&signature);
        Ok(url)
    }

    /// Delete the payload and prune emptied shard directories.
    async fn delete(&self, key: &str) -> StoreResult<()> {
        validate_object_key(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root();
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Write, read back and remove a probe file under `base_path`.
    async fn ping(&self) -> StoreResult<()> {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::other(
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

/// Rename `from` onto `to`, removing an existing `to` first where rename
/// refuses to overwrite.
async fn place_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(to).await?;
            fs::rename(from, to).await
        }
        other => other,
    }
}

/// Percent-encode each `/`-separated segment of a key, keeping the slashes.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, UNRESERVED).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalObjectStore {
        LocalObjectStore::new(
            dir.path(),
            "images",
            "http://localhost:3000/blobs/",
            UrlSigner::new("test-secret"),
        )
    }

    /// Split a signed link into its key and parsed query.
    fn parse_link(url: &str) -> (String, SignedQuery) {
        let rest = url
            .strip_prefix("http://localhost:3000/blobs/")
            .expect("link base");
        let (path, query) = rest.split_once('?').expect("query string");
        let key = percent_encoding::percent_decode_str(path)
            .decode_utf8()
            .unwrap()
            .into_owned();
        let mut parsed = SignedQuery {
            bucket: String::new(),
            method: String::new(),
            expires: 0,
            content_type: None,
            signature: String::new(),
        };
        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').unwrap();
            let value = percent_encoding::percent_decode_str(value)
                .decode_utf8()
                .unwrap()
                .into_owned();
            match name {
                "bucket" => parsed.bucket = value,
                "method" => parsed.method = value,
                "expires" => parsed.expires = value.parse().unwrap(),
                "content_type" => parsed.content_type = Some(value),
                "signature" => parsed.signature = value,
                other => panic!("unexpected query param {other}"),
            }
        }
        (key, parsed)
    }

    #[test]
    fn keys_are_encoded_per_segment() {
        assert_eq!(encode_key("u1/abc/my pic.jpg"), "u1/abc/my%20pic.jpg");
        assert_eq!(encode_key("u1/abc/a+b&c.png"), "u1/abc/a%2Bb%26c.png");
    }

    #[test]
    fn shards_are_stable_hex_pairs() {
        let (a, b) = LocalObjectStore::object_shards("images", "u/i/a.jpg");
        assert_eq!((a.len(), b.len()), (2, 2));
        assert_eq!(
            LocalObjectStore::object_shards("images", "u/i/a.jpg"),
            (a, b)
        );
    }

    #[tokio::test]
    async fn presigned_put_link_authorizes_only_its_own_method() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = store
            .presign(
                SignedMethod::Put,
                "u1/id/pic one.jpg",
                Some("image/jpeg"),
                Duration::from_secs(900),
            )
            .await
            .unwrap();

        let (key, query) = parse_link(&url);
        assert_eq!(key, "u1/id/pic one.jpg");
        assert_eq!(query.content_type.as_deref(), Some("image/jpeg"));

        let now = Utc::now().timestamp();
        assert!(store.authorize(SignedMethod::Put, &key, &query, now).is_ok());
        assert!(matches!(
            store.authorize(SignedMethod::Get, &key, &query, now),
            Err(BlobError::SignatureMismatch)
        ));
        assert!(matches!(
            store.authorize(SignedMethod::Put, "u1/id/other.jpg", &query, now),
            Err(BlobError::SignatureMismatch)
        ));
        assert!(matches!(
            store.authorize(SignedMethod::Put, &key, &query, query.expires + 1),
            Err(BlobError::Expired)
        ));
    }

    #[tokio::test]
    async fn tampered_content_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = store
            .presign(
                SignedMethod::Get,
                "u1/id/a.png",
                Some("image/png"),
                Duration::from_secs(300),
            )
            .await
            .unwrap();
        let (key, mut query) = parse_link(&url);
        query.content_type = Some("text/html".into());
        assert!(matches!(
            store.authorize(SignedMethod::Get, &key, &query, Utc::now().timestamp()),
            Err(BlobError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn write_open_and_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);

        let stored = store.write_stream("u1/id/a.txt", chunks).await.unwrap();
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"hello world")));

        let (_file, len) = store.open("u1/id/a.txt").await.unwrap();
        assert_eq!(len, 11);

        store.delete("u1/id/a.txt").await.unwrap();
        assert!(matches!(
            store.open("u1/id/a.txt").await,
            Err(BlobError::NotFound(_))
        ));
        // shard directories are pruned back to the bucket root
        let bucket_root = dir.path().join("images");
        let mut entries = fs::read_dir(&bucket_root).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_missing_object_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).delete("u1/id/never.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::BrokenPipe, "client went away")),
        ]);
        assert!(store.write_stream("u1/id/b.bin", chunks).await.is_err());
        assert!(matches!(
            store.open("u1/id/b.bin").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn overwriting_an_object_replaces_its_bytes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for body in [&b"first"[..], &b"second"[..]] {
            let chunks = futures::stream::iter(vec![Ok(Bytes::copy_from_slice(body))]);
            store.write_stream("u1/id/c.bin", chunks).await.unwrap();
        }
        let (_file, len) = store.open("u1/id/c.bin").await.unwrap();
        assert_eq!(len, 6);
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let target = store.object_path("u1/id/d.bin");
        fs::create_dir_all(target.join("occupied")).await.unwrap();

        let chunks = futures::stream::iter(vec![Ok(Bytes::from_static(b"data"))]);
        assert!(store.write_stream("u1/id/d.bin", chunks).await.is_err());

        let mut entries = fs::read_dir(target.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["d.bin"]);
    }

    #[tokio::test]
    async fn ping_succeeds_on_a_writable_directory() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).ping().await.is_ok());
    }

    #[tokio::test]
    async fn presign_rejects_unsafe_keys() {
        let dir = TempDir::new().unwrap();
        let result = store(&dir)
            .presign(SignedMethod::Get, "../escape", None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidObjectKey(_))));
    }
}
