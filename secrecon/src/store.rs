//! Results store: run summaries and the artifact log
//!
//! Two tables, created idempotently by [`ResultsStore::init_schema`]:
//! - `recon_run_summary`: one row per (run_id, as_of_date), upserted
//! - `artifact_log`: append-only record of published artifacts

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use secrecon_common::{Error, MetricsPayload, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Artifact type recorded for exception files
pub const EXCEPTIONS_ARTIFACT: &str = "exceptions";

/// Status recorded for a verified upload
pub const STATUS_UPLOADED: &str = "uploaded";

/// Metrics persistence collaborator
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Upsert keyed by (run_id, as_of_date)
    async fn persist(&self, metrics: &MetricsPayload) -> Result<()>;
}

/// Published-artifact bookkeeping
#[async_trait]
pub trait ArtifactLog: Send + Sync {
    async fn record_upload(
        &self,
        run_id: &str,
        as_of_date: NaiveDate,
        artifact_type: &str,
        uri: &str,
        status: &str,
    ) -> Result<()>;

    /// Most recent entry for the run, by `uploaded_at`
    async fn fetch_latest(&self, run_id: &str, artifact_type: &str) -> Result<Option<ArtifactRecord>>;
}

/// One `artifact_log` row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub id: i64,
    pub run_id: String,
    pub as_of_date: NaiveDate,
    pub artifact_type: String,
    pub uri: String,
    pub status: String,
    pub uploaded_at: DateTime<Utc>,
}

/// SQLite-backed results store
#[derive(Clone)]
pub struct ResultsStore {
    pool: SqlitePool,
}

impl ResultsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip to the results database
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create both tables if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recon_run_summary (
                run_id TEXT NOT NULL,
                as_of_date TEXT NOT NULL,
                total_exceptions INTEGER NOT NULL,
                unexplained_exceptions INTEGER NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (run_id, as_of_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifact_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                as_of_date TEXT NOT NULL,
                artifact_type TEXT NOT NULL,
                uri TEXT NOT NULL,
                status TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifact_log_run ON artifact_log(run_id, artifact_type)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Run ids recorded for a date, oldest first
    pub async fn list_run_ids(&self, as_of_date: NaiveDate) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT run_id FROM recon_run_summary WHERE as_of_date = ? ORDER BY updated_at, run_id",
        )
        .bind(as_of_date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Stored summary for a run, if metrics were persisted
    pub async fn fetch_summary(&self, run_id: &str, as_of_date: NaiveDate) -> Result<Option<MetricsPayload>> {
        let row = sqlx::query(
            r#"
            SELECT total_exceptions, unexplained_exceptions
            FROM recon_run_summary
            WHERE run_id = ? AND as_of_date = ?
            "#,
        )
        .bind(run_id)
        .bind(as_of_date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let total: i64 = row.get("total_exceptions");
            let unexplained: i64 = row.get("unexplained_exceptions");
            MetricsPayload {
                run_id: run_id.to_string(),
                as_of_date,
                total_exceptions: total as u64,
                unexplained_exceptions: unexplained as u64,
            }
        }))
    }
}

#[async_trait]
impl MetricsSink for ResultsStore {
    async fn persist(&self, metrics: &MetricsPayload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recon_run_summary (run_id, as_of_date, total_exceptions, unexplained_exceptions)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(run_id, as_of_date) DO UPDATE SET
                total_exceptions = excluded.total_exceptions,
                unexplained_exceptions = excluded.unexplained_exceptions,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&metrics.run_id)
        .bind(metrics.as_of_date.format("%Y-%m-%d").to_string())
        .bind(metrics.total_exceptions as i64)
        .bind(metrics.unexplained_exceptions as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Sink(format!("persist metrics for run {} failed: {}", metrics.run_id, e)))?;

        debug!(
            run_id = %metrics.run_id,
            total = metrics.total_exceptions,
            "Run summary persisted"
        );
        Ok(())
    }
}

#[async_trait]
impl ArtifactLog for ResultsStore {
    async fn record_upload(
        &self,
        run_id: &str,
        as_of_date: NaiveDate,
        artifact_type: &str,
        uri: &str,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifact_log (run_id, as_of_date, artifact_type, uri, status, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(as_of_date.format("%Y-%m-%d").to_string())
        .bind(artifact_type)
        .bind(uri)
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_latest(&self, run_id: &str, artifact_type: &str) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, run_id, as_of_date, artifact_type, uri, status, uploaded_at
            FROM artifact_log
            WHERE run_id = ? AND artifact_type = ?
            ORDER BY uploaded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .bind(artifact_type)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let as_of_date: String = row.get("as_of_date");
        let as_of_date = NaiveDate::parse_from_str(&as_of_date, "%Y-%m-%d")
            .map_err(|e| Error::Sink(format!("artifact_log: bad as_of_date '{}': {}", as_of_date, e)))?;

        let uploaded_at: String = row.get("uploaded_at");
        let uploaded_at = DateTime::parse_from_rfc3339(&uploaded_at)
            .map_err(|e| Error::Sink(format!("artifact_log: bad uploaded_at '{}': {}", uploaded_at, e)))?
            .with_timezone(&Utc);

        Ok(Some(ArtifactRecord {
            id: row.get("id"),
            run_id: row.get("run_id"),
            as_of_date,
            artifact_type: row.get("artifact_type"),
            uri: row.get("uri"),
            status: row.get("status"),
            uploaded_at,
        }))
    }
}
