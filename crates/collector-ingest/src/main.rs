//! Collector Ingest - remote file ingestion tool

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use collector_common::logging::{init_logging, LogConfig, LogLevel};
use collector_ingest::config::{EventBusBackend, LedgerBackend, DEFAULT_AUDIT_TOPIC};
use collector_ingest::events::{EventBus, HttpEventBus, LogEventBus};
use collector_ingest::ledger::{AuditLedger, JsonlAuditLedger, MemoryAuditLedger, PgAuditLedger};
use collector_ingest::storage::S3Storage;
use collector_ingest::transport::connector_for;
use collector_ingest::{CollectorConfig, IngestSettings, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "collector-ingest")]
#[command(author, version, about = "Remote file collector ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run one ingestion for a collector
    Run {
        /// Collector configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Run date used in destination keys (YYYY-MM-DD, default today UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Event bus topic for ingestion events
        #[arg(short, long, default_value = DEFAULT_AUDIT_TOPIC)]
        topic: String,
    },

    /// Load and validate a collector configuration
    CheckConfig {
        /// Collector configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("collector-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env().context("Invalid LOG_* settings")?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { config, date, topic } => {
            let collector = CollectorConfig::load(&config)?;
            let settings = IngestSettings::from_env()?;
            let run_date = date.unwrap_or_else(|| Utc::now().date_naive());

            info!(
                collector_id = %collector.collector_id,
                protocol = %collector.protocol,
                host = %collector.host,
                %run_date,
                "Starting ingestion run"
            );

            let orchestrator = build_orchestrator(&settings, &collector).await?;
            let report = orchestrator.run_ingestion(&collector, run_date, &topic).await?;

            if report.has_failures() {
                warn!(
                    failed = report.stats.files_failed,
                    "Run completed with failed files; they will be retried next run"
                );
            }
        },
        Command::CheckConfig { config } => {
            let collector = CollectorConfig::load(&config)?;
            info!(?collector, "Collector configuration is valid");
        },
    }

    Ok(())
}

async fn build_orchestrator(settings: &IngestSettings, collector: &CollectorConfig) -> Result<Orchestrator> {
    let ledger: Arc<dyn AuditLedger> = match &settings.ledger {
        LedgerBackend::Postgres { url, max_connections } => {
            let ledger = PgAuditLedger::connect(url, *max_connections)
                .await
                .context("Failed to connect to audit ledger database")?;
            ledger.migrate().await?;
            Arc::new(ledger)
        },
        LedgerBackend::Jsonl { path } => {
            info!(ledger = %path.display(), "Using JSON-lines audit ledger");
            Arc::new(JsonlAuditLedger::open(path).await?)
        },
        LedgerBackend::Memory => {
            warn!("Using in-memory audit ledger; outcomes are not kept between runs");
            Arc::new(MemoryAuditLedger::new())
        },
    };

    let events: Arc<dyn EventBus> = match &settings.events {
        EventBusBackend::Http { base_url } => Arc::new(HttpEventBus::new(base_url.as_str())?),
        EventBusBackend::Log => Arc::new(LogEventBus),
    };

    let store = Arc::new(S3Storage::new(settings.storage.clone()).await?);

    Ok(Orchestrator::new(connector_for(collector.protocol), ledger, store, events)
        .with_profile(settings.profile.clone())
        .with_purge_staging(settings.purge_staging))
}
