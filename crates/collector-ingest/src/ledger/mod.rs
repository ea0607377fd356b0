//! Audit ledger: per-file ingestion outcomes
//!
//! The ledger answers one question before each download, namely whether the
//! remote file was already ingested successfully, and stores one record per
//! terminal file outcome. Lookups are keyed by collector id and remote source
//! path. A source path that produced several records in one run (an archive)
//! counts as `FAILED` when any record of its latest run failed.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AuditRecord, JobStatus};

pub mod jsonl;
pub mod memory;
pub mod postgres;

pub use jsonl::JsonlAuditLedger;
pub use memory::MemoryAuditLedger;
pub use postgres::PgAuditLedger;

/// Trait for audit ledgers (dependency injection)
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Status of the latest run that touched `source_path`, if any
    async fn latest_status(&self, collector_id: &str, source_path: &str) -> Result<Option<JobStatus>>;

    /// Append one outcome
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Reduce the records of one source path to the status of its latest run.
///
/// Records are expected in insertion order; on equal timestamps the later
/// insertion wins.
pub(crate) fn latest_run_status<'a, I>(records: I) -> Option<JobStatus>
where
    I: IntoIterator<Item = &'a AuditRecord>,
    I::IntoIter: Clone,
{
    let records = records.into_iter();
    let latest = records
        .clone()
        .fold(None::<&AuditRecord>, |latest, r| match latest {
            Some(l) if l.recorded_at > r.recorded_at => Some(l),
            _ => Some(r),
        })?;

    let failed = records
        .filter(|r| r.run_id == latest.run_id)
        .any(|r| r.job_status == JobStatus::Failed);

    Some(if failed { JobStatus::Failed } else { JobStatus::Successful })
}
