//! Run state and run report

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{FileOutcome, RunContext};

/// States of one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    SessionOpen,
    Walking,
    SessionClose,
    Done,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::SessionOpen => "SESSION_OPEN",
            RunState::Walking => "WALKING",
            RunState::SessionClose => "SESSION_CLOSE",
            RunState::Done => "DONE",
            RunState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Remote files considered, archives counted once
    pub files_seen: u64,
    /// Files skipped because the ledger already had them
    pub files_skipped: u64,
    /// Concrete files uploaded
    pub files_published: u64,
    /// Concrete file outcomes recorded as failed
    pub files_failed: u64,
    /// Archives unpacked, nested ones included
    pub archives_extracted: u64,
    /// Bytes written to object storage
    pub bytes_uploaded: u64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark stats as completed
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    /// Count one file outcome
    pub fn record_outcome(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Skipped { .. } => self.files_skipped += 1,
            FileOutcome::Published(_) => self.files_published += 1,
            FileOutcome::Failed(_) => self.files_failed += 1,
        }
    }
}

/// What one run did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub collector_id: String,
    pub run_date: NaiveDate,
    pub final_state: RunState,
    pub stats: RunStats,
    /// One entry per skipped, published or failed file, in processing order
    pub outcomes: Vec<FileOutcome>,
}

impl RunReport {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id,
            collector_id: ctx.collector_id.clone(),
            run_date: ctx.run_date,
            final_state: RunState::Init,
            stats: RunStats::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: FileOutcome) {
        self.stats.record_outcome(&outcome);
        self.outcomes.push(outcome);
    }

    pub fn published(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Published(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| matches!(o, FileOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.stats.files_failed > 0
    }
}
