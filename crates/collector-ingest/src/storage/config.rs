use serde::{Deserialize, Serialize};
use std::env;

/// Connection settings for the S3-compatible object store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint (MinIO, Ceph); `None` uses AWS
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,

    /// Static access key; `None` defers to the AWS default credential chain
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    /// Read `S3_*` settings. Keys fall back to `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`; with neither set, the default AWS credential
    /// chain (profile, instance role) is used.
    pub fn from_env() -> anyhow::Result<Self> {
        let access_key = env::var("S3_ACCESS_KEY").or_else(|_| env::var("AWS_ACCESS_KEY_ID")).ok();
        let secret_key = env::var("S3_SECRET_KEY")
            .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
            .ok();
        if access_key.is_some() != secret_key.is_some() {
            anyhow::bail!("S3 access key and secret key must be set together");
        }

        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "collector-data".to_string()),
            access_key,
            secret_key,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}
