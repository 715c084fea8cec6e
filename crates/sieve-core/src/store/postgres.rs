//! PostgreSQL result store

use super::{AnalysisRecord, RecordUpdate, ReportState, ResultStore};
use crate::{ContentHash, CoreError, CoreResult, Report};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

const UPSERT_READY: &str = r#"
    INSERT INTO files (file_hash, analysis_result, file_type, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (file_hash) DO UPDATE SET
        analysis_result = EXCLUDED.analysis_result,
        file_type = COALESCE(EXCLUDED.file_type, files.file_type),
        updated_at = NOW()
"#;

// Pending markers and label-only updates never touch a stored report.
const UPSERT_MARKER: &str = r#"
    INSERT INTO files (file_hash, analysis_result, file_type, updated_at)
    VALUES ($1, NULL, $2, NOW())
    ON CONFLICT (file_hash) DO UPDATE SET
        file_type = COALESCE(EXCLUDED.file_type, files.file_type),
        updated_at = NOW()
"#;

/// Statement that applies `update`
fn upsert_statement(update: &RecordUpdate) -> &'static str {
    match update.report {
        Some(ReportState::Ready { .. }) => UPSERT_READY,
        Some(ReportState::Pending) | None => UPSERT_MARKER,
    }
}

/// Result store over the `files` table
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Database(e.into()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn lookup(&self, hash: &ContentHash) -> CoreResult<Option<AnalysisRecord>> {
        let row = sqlx::query(
            "SELECT analysis_result, file_type, updated_at FROM files WHERE file_hash = $1",
        )
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let analysis_result: Option<String> = row.try_get("analysis_result")?;
        let type_label: Option<String> = row.try_get("file_type")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        let report = match analysis_result.map(|text| serde_json::from_str(&text)) {
            Some(Ok(value)) => ReportState::Ready {
                report: Report::new(value),
            },
            Some(Err(e)) => {
                warn!("Unreadable stored report for {}: {}", hash, e);
                ReportState::Pending
            }
            None => ReportState::Pending,
        };

        Ok(Some(AnalysisRecord {
            content_hash: hash.clone(),
            report,
            type_label,
            updated_at,
        }))
    }

    async fn upsert(&self, hash: &ContentHash, update: RecordUpdate) -> CoreResult<()> {
        let statement = upsert_statement(&update);
        let query = match update.report {
            Some(ReportState::Ready { report }) => sqlx::query(statement)
                .bind(hash.as_str())
                .bind(serde_json::to_string(report.as_value())?)
                .bind(update.type_label),
            Some(ReportState::Pending) | None => sqlx::query(statement)
                .bind(hash.as_str())
                .bind(update.type_label),
        };

        match query.execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Another request inserted this hash first
                debug!("Concurrent insert for {} absorbed", hash);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
