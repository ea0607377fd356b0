//! In-process ledger, used by tests and dry runs

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{latest_run_status, AuditLedger};
use crate::error::{IngestError, Result};
use crate::model::{AuditRecord, JobStatus};

#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLedger {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with earlier outcomes
    pub fn with_records(records: Vec<AuditRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// Snapshot of every record written so far, in insertion order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditLedger for MemoryAuditLedger {
    async fn latest_status(&self, collector_id: &str, source_path: &str) -> Result<Option<JobStatus>> {
        let records = self
            .records
            .lock()
            .map_err(|_| IngestError::ledger("in-memory ledger lock poisoned"))?;

        Ok(latest_run_status(
            records
                .iter()
                .filter(|r| r.collector_id == collector_id && r.source_path == source_path),
        ))
    }

    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| IngestError::ledger("in-memory ledger lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    use crate::model::RunContext;

    fn context(collector_id: &str) -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            collector_id: collector_id.into(),
            process_type: "COLLECTION".into(),
            profile: "dev".into(),
            file_type: "PM".into(),
            delimiter: ";".into(),
            host: "h".into(),
            run_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            audit_topic: "ingestion-audit".into(),
        }
    }

    #[tokio::test]
    async fn test_lookup_is_scoped_by_collector() {
        let ledger = MemoryAuditLedger::new();
        let ctx = context("c1");
        ledger
            .record(&AuditRecord::successful(&ctx, "dev/PM/h/2026-10-17/a.txt", "/r/a.txt"))
            .await
            .unwrap();

        assert_eq!(
            ledger.latest_status("c1", "/r/a.txt").await.unwrap(),
            Some(JobStatus::Successful)
        );
        assert_eq!(ledger.latest_status("c2", "/r/a.txt").await.unwrap(), None);
        assert_eq!(ledger.latest_status("c1", "/r/other.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_later_run_supersedes_failure() {
        let ledger = MemoryAuditLedger::new();
        let first = context("c1");
        ledger
            .record(&AuditRecord::failed(&first, "/r/a.txt", "/r/a.txt", "timeout"))
            .await
            .unwrap();
        assert_eq!(
            ledger.latest_status("c1", "/r/a.txt").await.unwrap(),
            Some(JobStatus::Failed)
        );

        let second = context("c1");
        ledger
            .record(&AuditRecord::successful(&second, "k", "/r/a.txt"))
            .await
            .unwrap();
        assert_eq!(
            ledger.latest_status("c1", "/r/a.txt").await.unwrap(),
            Some(JobStatus::Successful)
        );
        assert_eq!(ledger.records().len(), 2);
    }
}
