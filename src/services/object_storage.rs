//! Remote object storage: streamed uploads and presigned downloads.

use crate::models::{geometry::GeometryClass, object_ref::StorageObjectRef};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
};
use std::{path::Path, time::Duration, time::Instant};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("failed to upload `{key}` to bucket `{bucket}`: {reason}")]
    UploadFailed {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("failed to sign `{key}` in bucket `{bucket}`: {reason}")]
    SigningFailed {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("failed to delete `{key}` from bucket `{bucket}`: {reason}")]
    DeleteFailed {
        bucket: String,
        key: String,
        reason: String,
    },
}

pub type ObjectStorageResult<T> = Result<T, ObjectStorageError>;

/// Durable storage for published artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Bucket new objects are written to.
    fn bucket(&self) -> &str;

    /// Stream the file at `path` to `key`, tagged with `content_type`.
    async fn upload(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> ObjectStorageResult<StorageObjectRef>;

    /// Time-limited GET URL for exactly one object.
    async fn sign(&self, object: &StorageObjectRef, ttl: Duration) -> ObjectStorageResult<String>;

    async fn delete(&self, object: &StorageObjectRef) -> ObjectStorageResult<()>;
}

/// Build a fresh key for a video of the given geometry:
/// `<class>/<32 hex chars>.mp4`.
pub fn video_object_key(class: GeometryClass) -> String {
    let suffix: [u8; 16] = rand::random();
    format!("{}/{}.mp4", class, hex::encode(suffix))
}

/// S3 (or S3-compatible) storage.
#[derive(Clone, Debug)]
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
}

impl S3ObjectStorage {
    /// Build a client from the ambient AWS configuration (env, profile,
    /// instance metadata).
    ///
    /// # Arguments
    /// * `bucket` - bucket new videos are written to
    /// * `region` - AWS region, or the region identifier of an S3-compatible provider
    /// * `endpoint_url` - custom endpoint (e.g. `http://localhost:9000` for MinIO);
    ///   switches to path-style addressing
    pub async fn from_env(bucket: String, region: String, endpoint_url: Option<String>) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::with_client(Client::from_conf(builder.build()), bucket)
    }

    pub fn with_client(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> ObjectStorageResult<StorageObjectRef> {
        let start = Instant::now();
        let fail = |reason: String| {
            error!(
                bucket = %self.bucket,
                key = %key,
                error = %reason,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            ObjectStorageError::UploadFailed {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                reason,
            }
        };

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let size_bytes = body.size_hint().0;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| fail(DisplayErrorContext(&e).to_string()))?;

        info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(StorageObjectRef::new(self.bucket.clone(), key))
    }

    async fn sign(&self, object: &StorageObjectRef, ttl: Duration) -> ObjectStorageResult<String> {
        let fail = |reason: String| ObjectStorageError::SigningFailed {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            reason,
        };

        let config = PresigningConfig::expires_in(ttl).map_err(|e| fail(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .presigned(config)
            .await
            .map_err(|e| fail(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }

    async fn delete(&self, object: &StorageObjectRef) -> ObjectStorageResult<()> {
        self.client
            .delete_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| ObjectStorageError::DeleteFailed {
                bucket: object.bucket.clone(),
                key: object.key.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        info!(bucket = %object.bucket, key = %object.key, "S3 delete successful");
        Ok(())
    }
}
