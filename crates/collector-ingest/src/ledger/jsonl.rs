//! Append-only JSON-lines ledger for single-host deployments

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{latest_run_status, AuditLedger};
use crate::error::{IngestError, Result};
use crate::model::{AuditRecord, JobStatus};

/// One JSON object per line; lines that fail to parse are ignored on read
#[derive(Debug)]
pub struct JsonlAuditLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLedger {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<AuditRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IngestError::ledger(format!("reading {}: {}", self.path.display(), e))),
        };

        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    ledger = %self.path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping unreadable ledger line"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AuditLedger for JsonlAuditLedger {
    async fn latest_status(&self, collector_id: &str, source_path: &str) -> Result<Option<JobStatus>> {
        let records = self.read_all().await?;
        Ok(latest_run_status(
            records
                .iter()
                .filter(|r| r.collector_id == collector_id && r.source_path == source_path),
        ))
    }

    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(IngestError::ledger)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| IngestError::ledger(format!("opening {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await.map_err(IngestError::ledger)?;
        file.flush().await.map_err(IngestError::ledger)?;

        debug!(audit_id = %record.id, status = %record.job_status, "Appended ledger record");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(run_id: Uuid, source: &str, status: JobStatus) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            run_id,
            collector_id: "c1".into(),
            file_path: source.into(),
            source_path: source.into(),
            job_status: status,
            error_message: (status == JobStatus::Failed).then(|| "boom".to_string()),
            process_type: "COLLECTION".into(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonlAuditLedger::open(dir.path().join("audit.jsonl")).await.unwrap();
        assert_eq!(ledger.latest_status("c1", "/r/a.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");
        let run = Uuid::new_v4();
        {
            let ledger = JsonlAuditLedger::open(&path).await.unwrap();
            ledger.record(&record(run, "/r/a.txt", JobStatus::Successful)).await.unwrap();
            ledger.record(&record(run, "/r/b.zip", JobStatus::Failed)).await.unwrap();
        }

        let reopened = JsonlAuditLedger::open(&path).await.unwrap();
        assert_eq!(
            reopened.latest_status("c1", "/r/a.txt").await.unwrap(),
            Some(JobStatus::Successful)
        );
        assert_eq!(
            reopened.latest_status("c1", "/r/b.zip").await.unwrap(),
            Some(JobStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let good = serde_json::to_string(&record(Uuid::new_v4(), "/r/a.txt", JobStatus::Successful)).unwrap();
        std::fs::write(&path, format!("{{not json\n{}\n", good)).unwrap();

        let ledger = JsonlAuditLedger::open(&path).await.unwrap();
        assert_eq!(
            ledger.latest_status("c1", "/r/a.txt").await.unwrap(),
            Some(JobStatus::Successful)
        );
    }
}
