//! Pipeline orchestrator: one ingestion run from configuration to report
//!
//! ```text
//! INIT -> SESSION_OPEN -> WALKING -> SESSION_CLOSE -> DONE
//!            |                          ^
//!            +------> ABORTED ----------+ (close still attempted)
//! ```
//!
//! Session-level failures abort the run and are returned to the caller. File
//! failures never do; they show up as `FAILED` audit records and in the report.

use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{CollectorConfig, DEFAULT_PROFILE};
use crate::error::{IngestError, Result};
use crate::events::EventBus;
use crate::gateway::PublishGateway;
use crate::ledger::AuditLedger;
use crate::model::RunContext;
use crate::report::{RunReport, RunState};
use crate::storage::ObjectStore;
use crate::transport::{Connector, RemoteSession, TransferChannel};
use crate::walker::Walker;

pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    ledger: Arc<dyn AuditLedger>,
    store: Arc<dyn ObjectStore>,
    events: Arc<dyn EventBus>,
    profile: String,
    purge_staging: bool,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn Connector>,
        ledger: Arc<dyn AuditLedger>,
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            connector,
            ledger,
            store,
            events,
            profile: DEFAULT_PROFILE.to_string(),
            purge_staging: false,
        }
    }

    /// Environment profile used as the first destination key segment
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Remove staged files after a run that ends `DONE` with no failed file
    pub fn with_purge_staging(mut self, purge: bool) -> Self {
        self.purge_staging = purge;
        self
    }

    /// Execute one ingestion run for `config`.
    ///
    /// Returns the report of a `DONE` run. `Config` and `Session` errors, and a
    /// failure to list the remote root, end the run as `ABORTED` and are
    /// returned instead.
    #[instrument(
        name = "ingestion_run",
        skip_all,
        fields(collector_id = %config.collector_id, host = %config.host, run_date = %run_date)
    )]
    pub async fn run_ingestion(
        &self,
        config: &CollectorConfig,
        run_date: NaiveDate,
        audit_topic: &str,
    ) -> Result<RunReport> {
        // INIT
        let ctx = self.init(config, run_date, audit_topic).await?;
        let mut report = RunReport::new(&ctx);
        info!(run_id = %ctx.run_id, state = %RunState::Init, "Run initialized");

        // SESSION_OPEN
        transition(&mut report, RunState::SessionOpen);
        let mut session = match self.connector.connect(&config.target()).await {
            Ok(session) => session,
            Err(e) => return Err(abort(&mut report, as_session_error(e))),
        };

        let mut channel = match session.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                close(None, session.as_mut()).await;
                return Err(abort(&mut report, as_session_error(e)));
            },
        };

        let remote_root = match channel.change_directory(&config.remote_root).await {
            Ok(root) => root,
            Err(e) => {
                close(Some(channel.as_mut()), session.as_mut()).await;
                return Err(abort(
                    &mut report,
                    IngestError::session(format!("Cannot enter remote root {}: {}", config.remote_root, e)),
                ));
            },
        };

        // WALKING
        transition(&mut report, RunState::Walking);
        let gateway = PublishGateway::new(
            ctx,
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            Arc::clone(&self.events),
        );
        let walked = Walker::new(channel.as_mut(), self.ledger.as_ref(), &gateway, &config.staging_root)
            .walk(&remote_root, &mut report)
            .await;

        // SESSION_CLOSE
        transition(&mut report, RunState::SessionClose);
        close(Some(channel.as_mut()), session.as_mut()).await;

        if let Err(e) = walked {
            return Err(abort(&mut report, e));
        }

        report.stats.complete();
        transition(&mut report, RunState::Done);
        info!(
            run_id = %report.run_id,
            seen = report.stats.files_seen,
            skipped = report.stats.files_skipped,
            published = report.stats.files_published,
            failed = report.stats.files_failed,
            bytes = report.stats.bytes_uploaded,
            duration_secs = report.stats.duration_secs,
            "Ingestion run completed"
        );

        if self.purge_staging && !report.has_failures() {
            purge_staging(&config.staging_root).await;
        } else {
            debug!(staging = %config.staging_root.display(), "Staged files retained");
        }

        Ok(report)
    }

    async fn init(&self, config: &CollectorConfig, run_date: NaiveDate, audit_topic: &str) -> Result<RunContext> {
        config.validate()?;

        if self.profile.trim().is_empty() || self.profile.contains('/') {
            return Err(IngestError::config("profile must be a non-empty key segment without '/'"));
        }
        if audit_topic.trim().is_empty() {
            return Err(IngestError::config("audit topic cannot be empty"));
        }

        tokio::fs::create_dir_all(&config.staging_root).await.map_err(|e| {
            IngestError::config(format!(
                "Cannot create staging root {}: {}",
                config.staging_root.display(),
                e
            ))
        })?;

        Ok(RunContext {
            run_id: Uuid::new_v4(),
            collector_id: config.collector_id.clone(),
            process_type: config.process_type.clone(),
            profile: self.profile.clone(),
            file_type: config.file_type.clone(),
            delimiter: config.delimiter.clone(),
            host: config.host.clone(),
            run_date,
            audit_topic: audit_topic.to_string(),
        })
    }
}

fn transition(report: &mut RunReport, next: RunState) {
    info!(run_id = %report.run_id, from = %report.final_state, to = %next, "Run state transition");
    report.final_state = next;
}

fn abort(report: &mut RunReport, error: IngestError) -> IngestError {
    transition(report, RunState::Aborted);
    warn!(run_id = %report.run_id, error = %error, "Ingestion run aborted");
    error
}

fn as_session_error(error: IngestError) -> IngestError {
    match error {
        IngestError::Session(_) => error,
        other => IngestError::session(other.to_string()),
    }
}

/// Close the channel, then the session. Errors are logged and dropped.
async fn close(channel: Option<&mut dyn TransferChannel>, session: &mut dyn RemoteSession) {
    if let Some(channel) = channel {
        if let Err(e) = channel.disconnect().await {
            warn!(error = %e, "Failed to close transfer channel");
        }
    }
    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "Failed to close remote session");
    }
    debug!("Remote session closed");
}

/// Remove everything below the staging root, keeping the root itself
async fn purge_staging(staging_root: &Path) {
    let mut entries = match tokio::fs::read_dir(staging_root).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(staging = %staging_root.display(), error = %e, "Cannot read staging root for purge");
            return;
        },
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Staging purge interrupted");
                break;
            },
        };
        let path = entry.path();
        let removed = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        if let Err(e) = removed {
            warn!(path = %path.display(), error = %e, "Failed to purge staged path");
        }
    }

    info!(staging = %staging_root.display(), "Staging area purged");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn context() -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            collector_id: "c1".into(),
            process_type: "COLLECTION".into(),
            profile: "dev".into(),
            file_type: "PM".into(),
            delimiter: ",".into(),
            host: "h".into(),
            run_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            audit_topic: "t".into(),
        }
    }

    #[test]
    fn test_state_transitions_logged_at_info() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut report = RunReport::new(&context());
        tracing::subscriber::with_default(subscriber, || {
            transition(&mut report, RunState::SessionOpen);
        });

        assert_eq!(report.final_state, RunState::SessionOpen);
        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("INFO"), "{}", output);
        assert!(output.contains("Run state transition"), "{}", output);
        assert!(output.contains("to=SESSION_OPEN"), "{}", output);
    }
}
