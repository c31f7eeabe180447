//! Storage collaborator: upload a finished report and hand back a URL for it.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use thiserror::Error;

use crate::config::S3Config;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload of {key:?} to bucket {bucket:?} failed: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("could not issue a link for {key:?} in bucket {bucket:?}: {message}")]
    Link {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("report upload requested but no storage backend is configured")]
    NotConfigured,
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait::async_trait]
pub trait ReportStorage: Send + Sync {
    /// Store `bytes` as `file_name` and return a URL the caller can fetch it from.
    async fn upload(&self, bytes: Vec<u8>, file_name: &str, content_type: &str)
        -> StorageResult<String>;
}

/// S3/S3-compatible report storage.
pub struct S3ReportStorage {
    client: Client,
    bucket: String,
    prefix: String,
    public_base_url: Option<String>,
    presign_expiry: Duration,
}

impl S3ReportStorage {
    /// Build a client from static credentials when configured, otherwise from the
    /// default AWS provider chain.
    pub async fn new(config: &S3Config) -> Self {
        let region = Region::new(config.region.clone());
        let mut builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(id), Some(secret)) => aws_sdk_s3::Config::builder()
                .credentials_provider(Credentials::new(id, secret, None, None, "report-service"))
                .region(region)
                .behavior_version_latest(),
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        // Set custom endpoint for S3-compatible stores
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            public_base_url: config.public_base_url.clone(),
            presign_expiry: config.presign_expiry,
        }
    }

    fn full_key(&self, file_name: &str) -> String {
        object_key(&self.prefix, file_name)
    }
}

fn object_key(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), file_name)
    }
}

#[async_trait::async_trait]
impl ReportStorage for S3ReportStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let key = self.full_key(file_name);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                bucket: self.bucket.clone(),
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        tracing::info!(bucket = %self.bucket, key = %key, "uploaded report");

        if let Some(base) = &self.public_base_url {
            return Ok(format!("{base}/{key}"));
        }

        let link_err = |message: String| StorageError::Link {
            bucket: self.bucket.clone(),
            key: key.clone(),
            message,
        };
        let presigning =
            PresigningConfig::expires_in(self.presign_expiry).map_err(|e| link_err(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| link_err(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}
