//! SQLite implementation of the progress report repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::ProgressReport;
use crate::domain::ports::ProgressRepository;
use crate::infrastructure::database::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `ProgressRepository` using sqlx.
pub struct ProgressRepositoryImpl {
    pool: SqlitePool,
}

impl ProgressRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_report(row: &sqlx::sqlite::SqliteRow) -> DomainResult<ProgressReport> {
        Ok(ProgressReport {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            assignment_id: Uuid::parse_str(row.get::<String, _>("assignment_id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            timestamp: parse_datetime(row.get::<String, _>("timestamp").as_str())?,
            progress_pct: row.get::<i64, _>("progress_pct") as u8,
            summary: row.get("summary"),
            evidence: serde_json::from_str(row.get::<String, _>("evidence").as_str())?,
            blockers: serde_json::from_str(row.get::<String, _>("blockers").as_str())?,
            confidence: row.get::<i64, _>("confidence") as u8,
            valid: row.get::<i64, _>("valid") != 0,
        })
    }
}

#[async_trait]
impl ProgressRepository for ProgressRepositoryImpl {
    async fn insert(&self, report: &ProgressReport) -> DomainResult<()> {
        let evidence = serde_json::to_string(&report.evidence)?;
        let blockers = serde_json::to_string(&report.blockers)?;
        sqlx::query(
            "INSERT INTO progress (
                id, assignment_id, timestamp, progress_pct, summary,
                evidence, blockers, confidence, valid
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(report.id.to_string())
        .bind(report.assignment_id.to_string())
        .bind(format_datetime(report.timestamp))
        .bind(i64::from(report.progress_pct))
        .bind(&report.summary)
        .bind(&evidence)
        .bind(&blockers)
        .bind(i64::from(report.confidence))
        .bind(i64::from(report.valid))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_assignment(&self, assignment_id: Uuid) -> DomainResult<Vec<ProgressReport>> {
        let rows = sqlx::query(
            "SELECT * FROM progress WHERE assignment_id = ? ORDER BY timestamp",
        )
        .bind(assignment_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_report).collect()
    }
}
