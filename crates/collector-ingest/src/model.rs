//! Domain types shared by the walker, extractor, gateway and ledger

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Terminal status of one file ingestion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Successful,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Bare entry name as listed
    pub name: String,

    /// Absolute remote path (`/`-separated)
    pub path: String,

    pub is_directory: bool,

    /// Size in bytes, when the listing reports it
    pub size: Option<u64>,

    /// Real path of a symbolic link that resolves to a directory
    pub link_target: Option<String>,
}

impl RemoteEntry {
    /// `.` and `..` entries some servers include in listings
    pub fn is_pseudo(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Join a remote directory and a child name with exactly one `/`
pub fn join_remote(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{}", name)
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// One outcome of attempting to ingest one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,

    /// Run that produced this record
    pub run_id: Uuid,

    pub collector_id: String,

    /// Destination key on success, remote origin path on failure
    pub file_path: String,

    /// Remote file whose download produced this outcome; the ledger lookup key
    pub source_path: String,

    pub job_status: JobStatus,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,

    pub process_type: String,

    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn successful(ctx: &RunContext, key: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: ctx.run_id,
            collector_id: ctx.collector_id.clone(),
            file_path: key.into(),
            source_path: source_path.into(),
            job_status: JobStatus::Successful,
            error_message: None,
            process_type: ctx.process_type.clone(),
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        ctx: &RunContext,
        origin_path: impl Into<String>,
        source_path: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: ctx.run_id,
            collector_id: ctx.collector_id.clone(),
            file_path: origin_path.into(),
            source_path: source_path.into(),
            job_status: JobStatus::Failed,
            error_message: Some(error.to_string()),
            process_type: ctx.process_type.clone(),
            recorded_at: Utc::now(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.job_status == JobStatus::Successful
    }
}

/// A file materialized in the staging tree during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub local_path: PathBuf,

    /// Remote path of this concrete file. For archive members this is the
    /// archive's remote path followed by the member's path inside it.
    pub origin_path: String,

    /// Remote file that was downloaded to produce this one
    pub source_path: String,

    pub archive_member: bool,
}

/// Per-run identity and key components, fixed when the run starts
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub collector_id: String,
    pub process_type: String,
    pub profile: String,
    pub file_type: String,
    pub delimiter: String,
    pub host: String,
    pub run_date: NaiveDate,
    pub audit_topic: String,
}

impl RunContext {
    /// Run date as it appears in destination keys
    pub fn run_date_segment(&self) -> String {
        self.run_date.format("%Y-%m-%d").to_string()
    }
}

/// Result of handling one concrete file within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Latest ledger status was `SUCCESSFUL`; nothing downloaded or recorded
    Skipped { remote_path: String },
    Published(AuditRecord),
    Failed(AuditRecord),
}

impl FileOutcome {
    pub fn record(&self) -> Option<&AuditRecord> {
        match self {
            FileOutcome::Skipped { .. } => None,
            FileOutcome::Published(record) | FileOutcome::Failed(record) => Some(record),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_wire_format() {
        assert_eq!(serde_json::to_string(&JobStatus::Successful).unwrap(), "\"SUCCESSFUL\"");
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("PENDING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/r", "a.txt"), "/r/a.txt");
        assert_eq!(join_remote("/r/", "a.txt"), "/r/a.txt");
        assert_eq!(join_remote("/", "d"), "/d");
        assert_eq!(join_remote("", "d"), "/d");
    }

    #[test]
    fn test_pseudo_entries() {
        let dot = RemoteEntry {
            name: "..".into(),
            path: "/r/..".into(),
            is_directory: true,
            size: None,
            link_target: None,
        };
        assert!(dot.is_pseudo());
    }
}
