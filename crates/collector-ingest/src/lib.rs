//! Remote file collector: ingestion pipeline
//!
//! One run walks a configured FTP or SFTP tree, downloads every file the audit
//! ledger has not seen succeed, unpacks archives (nested at any depth), uploads
//! each resulting file to object storage under a deterministic key, and writes
//! one audit record plus one ingestion event per file outcome.
//!
//! # Examples
//!
//! ```rust,ignore
//! use collector_ingest::{CollectorConfig, Orchestrator};
//!
//! let config = CollectorConfig::load("collector.toml")?;
//! let orchestrator = Orchestrator::new(connector, ledger, store, events).with_profile("prod");
//! let report = orchestrator
//!     .run_ingestion(&config, run_date, "ingestion-audit")
//!     .await?;
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod keys;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod transport;
pub mod walker;

pub use config::{CollectorConfig, IngestSettings, Protocol};
pub use error::{IngestError, Result};
pub use model::{AuditRecord, FileOutcome, JobStatus, RemoteEntry, RunContext, StagedFile};
pub use pipeline::Orchestrator;
pub use report::{RunReport, RunState, RunStats};
