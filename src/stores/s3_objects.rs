//! S3-backed object store for the `aws` backend.
//!
//! Signed links are SigV4 presigned requests produced by the SDK; no bytes
//! pass through this service.

use super::{ObjectStore, SignedMethod, StoreError, StoreResult};
use async_trait::async_trait;
use aws_sdk_s3::{Client, error::DisplayErrorContext, presigning::PresigningConfig};
use std::{error::Error, time::Duration};

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign(
        &self,
        method: SignedMethod,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StoreResult<String> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|err| StoreError::Signing(err.to_string()))?;
        let content_type = content_type.map(str::to_string);

        let request = match method {
            SignedMethod::Put => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .set_content_type(content_type)
                .presigned(config)
                .await
                .map_err(|err| signing_error(method, err))?,
            SignedMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .set_response_content_type(content_type)
                .presigned(config)
                .await
                .map_err(|err| signing_error(method, err))?,
        };
        Ok(request.uri().to_string())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                StoreError::Backend(format!("DeleteObject failed: {}", DisplayErrorContext(err)))
            })?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| {
                StoreError::Backend(format!("HeadBucket failed: {}", DisplayErrorContext(err)))
            })?;
        Ok(())
    }
}

fn signing_error<E: Error>(method: SignedMethod, err: E) -> StoreError {
    StoreError::Signing(format!("{method} {}", DisplayErrorContext(err)))
}
