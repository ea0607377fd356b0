//! Ingestion events published once per file outcome

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::model::{AuditRecord, RunContext};
use crate::storage::UploadResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileIngested,
    FileFailed,
}

/// Event body: the audit record plus the collector metadata consumers need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub event_type: EventType,
    pub record: AuditRecord,
    pub file_type: String,
    pub delimiter: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
}

impl IngestionEvent {
    pub fn ingested(ctx: &RunContext, record: AuditRecord, upload: &UploadResult) -> Self {
        Self {
            event_type: EventType::FileIngested,
            record,
            file_type: ctx.file_type.clone(),
            delimiter: ctx.delimiter.clone(),
            size: Some(upload.size),
            checksum: Some(upload.checksum.clone()),
        }
    }

    pub fn failed(ctx: &RunContext, record: AuditRecord) -> Self {
        Self {
            event_type: EventType::FileFailed,
            record,
            file_type: ctx.file_type.clone(),
            delimiter: ctx.delimiter.clone(),
            size: None,
            checksum: None,
        }
    }
}

/// Trait for event buses (dependency injection)
///
/// Delivery is at-least-once; consumers deduplicate on `record.id`.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: &IngestionEvent) -> Result<()>;
}

/// Posts each event as JSON to `{base_url}/topics/{topic}`
#[derive(Debug, Clone)]
pub struct HttpEventBus {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventBus {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("collector-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::EventBus(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }
}

#[async_trait]
impl EventBus for HttpEventBus {
    async fn publish(&self, topic: &str, event: &IngestionEvent) -> Result<()> {
        let url = self.topic_url(topic);
        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| IngestError::EventBus(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::EventBus(format!(
                "POST {} returned {}: {}",
                url, status, body
            )));
        }

        debug!(topic, audit_id = %event.record.id, "Published ingestion event");
        Ok(())
    }
}

/// Writes events to the log instead of a broker
#[derive(Debug, Clone, Default)]
pub struct LogEventBus;

#[async_trait]
impl EventBus for LogEventBus {
    async fn publish(&self, topic: &str, event: &IngestionEvent) -> Result<()> {
        let payload = serde_json::to_string(event).map_err(|e| IngestError::EventBus(e.to_string()))?;
        info!(topic, payload = %payload, "Ingestion event");
        Ok(())
    }
}
