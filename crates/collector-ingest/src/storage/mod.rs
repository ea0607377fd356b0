//! Object storage for published files

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, primitives::ByteStream, Client};
use collector_common::{checksum::file_digest, types::ChecksumAlgorithm};
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};

pub mod config;

pub use config::StorageConfig;

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,

    /// Hex SHA-256 of the uploaded bytes
    pub checksum: String,

    pub size: u64,
}

/// Trait for object stores (dependency injection)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the file at `local_path` under `key`, replacing any existing object
    async fn put(&self, local_path: &Path, key: &str) -> Result<UploadResult>;
}

/// Digest a staged file on the blocking pool
pub async fn digest_file(local_path: &Path) -> Result<(String, u64)> {
    let path = local_path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || file_digest(&path, ChecksumAlgorithm::Sha256))
        .await
        .map_err(|e| IngestError::storage(format!("checksum task failed: {}", e)))??;
    Ok((digest.checksum, digest.size))
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing storage"
        );

        let region = Region::new(config.region.clone());
        let mut s3_config_builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "collector-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(region)
            },
            _ => {
                debug!("No static S3 keys, using the default AWS credential chain");
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        }
        .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> anyhow::Result<UploadResult> {
        let (checksum, size) = digest_file(local_path).await?;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .context("Failed to upload to S3")?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn put(&self, local_path: &Path, key: &str) -> Result<UploadResult> {
        self.upload_file(local_path, key)
            .await
            .map_err(|e| IngestError::storage(format!("{:#}", e)))
    }
}
