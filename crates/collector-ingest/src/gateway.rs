//! Upload/publish gateway
//!
//! Every concrete file outcome passes through here exactly once and leaves
//! exactly one audit record and one ingestion event behind. Ledger and event
//! bus problems are logged; they never turn a published file into a failed one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::events::{EventBus, IngestionEvent};
use crate::ledger::AuditLedger;
use crate::model::{AuditRecord, FileOutcome, RunContext, StagedFile};
use crate::storage::{ObjectStore, UploadResult};

pub struct PublishGateway {
    ctx: RunContext,
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn AuditLedger>,
    events: Arc<dyn EventBus>,
    bytes_uploaded: AtomicU64,
}

impl PublishGateway {
    pub fn new(
        ctx: RunContext,
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn AuditLedger>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            ctx,
            store,
            ledger,
            events,
            bytes_uploaded: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Total bytes uploaded through this gateway
    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::Relaxed)
    }

    /// Upload one staged file under `key`.
    ///
    /// A storage failure yields `FileOutcome::Failed` whose record names the
    /// file's remote origin path rather than the key.
    pub async fn publish(&self, staged: &StagedFile, key: &str) -> FileOutcome {
        match self.store.put(&staged.local_path, key).await {
            Ok(upload) => {
                self.bytes_uploaded.fetch_add(upload.size, Ordering::Relaxed);
                let record = AuditRecord::successful(&self.ctx, key, &staged.source_path);
                info!(
                    key = %key,
                    origin = %staged.origin_path,
                    bytes = upload.size,
                    "Published file"
                );
                self.emit(&record, Some(&upload)).await;
                FileOutcome::Published(record)
            },
            Err(e) => self.fail(&staged.origin_path, &staged.source_path, &e).await,
        }
    }

    /// Record a file-level failure for `origin_path`
    pub async fn fail(&self, origin_path: &str, source_path: &str, error: &IngestError) -> FileOutcome {
        warn!(origin = %origin_path, error = %error, "File ingestion failed");
        let record = AuditRecord::failed(&self.ctx, origin_path, source_path, error);
        self.emit(&record, None).await;
        FileOutcome::Failed(record)
    }

    async fn emit(&self, record: &AuditRecord, upload: Option<&UploadResult>) {
        if let Err(e) = self.ledger.record(record).await {
            error!(
                audit_id = %record.id,
                file_path = %record.file_path,
                status = %record.job_status,
                error = %e,
                "Failed to write audit record"
            );
        }

        let event = match upload {
            Some(upload) => IngestionEvent::ingested(&self.ctx, record.clone(), upload),
            None => IngestionEvent::failed(&self.ctx, record.clone()),
        };
        if let Err(e) = self.events.publish(&self.ctx.audit_topic, &event).await {
            error!(
                audit_id = %record.id,
                topic = %self.ctx.audit_topic,
                error = %e,
                "Failed to publish ingestion event"
            );
        }
    }
}
