//! PostgreSQL ledger on the `ingestion_audit` table

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use super::AuditLedger;
use crate::error::{IngestError, Result};
use crate::model::{AuditRecord, JobStatus};

#[derive(Debug, Clone)]
pub struct PgAuditLedger {
    pool: PgPool,
}

impl PgAuditLedger {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;

        info!(max_connections, "Audit ledger connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IngestError::ledger(format!("Failed to run migrations: {}", e)))?;

        info!("Audit ledger migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AuditLedger for PgAuditLedger {
    async fn latest_status(&self, collector_id: &str, source_path: &str) -> Result<Option<JobStatus>> {
        // NULL when the path has never been recorded
        let any_failed = sqlx::query_scalar::<_, Option<bool>>(
            r#"
            SELECT bool_or(job_status = 'FAILED')
            FROM ingestion_audit
            WHERE collector_id = $1
              AND source_path = $2
              AND run_id = (
                  SELECT run_id
                  FROM ingestion_audit
                  WHERE collector_id = $1 AND source_path = $2
                  ORDER BY recorded_at DESC
                  LIMIT 1
              )
            "#,
        )
        .bind(collector_id)
        .bind(source_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(any_failed.map(|failed| if failed { JobStatus::Failed } else { JobStatus::Successful }))
    }

    async fn record(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_audit (
                id, run_id, collector_id, file_path, source_path,
                job_status, error_message, process_type, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.run_id)
        .bind(&record.collector_id)
        .bind(&record.file_path)
        .bind(&record.source_path)
        .bind(record.job_status.as_str())
        .bind(&record.error_message)
        .bind(&record.process_type)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        debug!(
            audit_id = %record.id,
            status = %record.job_status,
            file_path = %record.file_path,
            "Created ingestion audit entry"
        );
        Ok(())
    }
}
