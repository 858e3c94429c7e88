//! SQLite implementation of the assignment repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Assignment, AssignmentStatus};
use crate::domain::ports::AssignmentRepository;
use crate::infrastructure::database::utils::{format_datetime, parse_datetime, parse_datetime_opt};

/// SQLite implementation of `AssignmentRepository` using sqlx.
pub struct AssignmentRepositoryImpl {
    pool: SqlitePool,
}

impl AssignmentRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_assignment(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Assignment> {
        let status_str: String = row.get("status");
        let status = AssignmentStatus::parse_str(&status_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown assignment status {status_str:?}"))
        })?;

        Ok(Assignment {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            task_id: Uuid::parse_str(row.get::<String, _>("task_id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            agent_id: row.get("agent_id"),
            allocation_id: Uuid::parse_str(row.get::<String, _>("allocation_id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            status,
            assigned_at: parse_datetime(row.get::<String, _>("assigned_at").as_str())?,
            expected_deadline: parse_datetime(row.get::<String, _>("expected_deadline").as_str())?,
            acked_at: parse_datetime_opt(row.get::<Option<String>, _>("acked_at").as_deref())?,
            last_heartbeat_at: parse_datetime(row.get::<String, _>("last_heartbeat_at").as_str())?,
            last_progress_at: parse_datetime(row.get::<String, _>("last_progress_at").as_str())?,
            progress_pct: row.get::<i64, _>("progress_pct") as u8,
            confidence: row.get::<i64, _>("confidence") as u8,
            stall_count: row.get::<i64, _>("stall_count") as u32,
            invalid_report_streak: row.get::<i64, _>("invalid_report_streak") as u32,
            deadline_escalated: row.get::<i64, _>("deadline_escalated") != 0,
            cancel_requested_at: parse_datetime_opt(
                row.get::<Option<String>, _>("cancel_requested_at").as_deref(),
            )?,
            completed_at: parse_datetime_opt(
                row.get::<Option<String>, _>("completed_at").as_deref(),
            )?,
        })
    }
}

#[async_trait]
impl AssignmentRepository for AssignmentRepositoryImpl {
    async fn insert(&self, assignment: &Assignment) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO assignments (
                id, task_id, agent_id, allocation_id, status, assigned_at,
                expected_deadline, acked_at, last_heartbeat_at,
                last_progress_at, progress_pct, confidence, stall_count,
                invalid_report_streak, deadline_escalated,
                cancel_requested_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(assignment.id.to_string())
        .bind(assignment.task_id.to_string())
        .bind(&assignment.agent_id)
        .bind(assignment.allocation_id.to_string())
        .bind(assignment.status.as_str())
        .bind(format_datetime(assignment.assigned_at))
        .bind(format_datetime(assignment.expected_deadline))
        .bind(assignment.acked_at.map(format_datetime))
        .bind(format_datetime(assignment.last_heartbeat_at))
        .bind(format_datetime(assignment.last_progress_at))
        .bind(i64::from(assignment.progress_pct))
        .bind(i64::from(assignment.confidence))
        .bind(i64::from(assignment.stall_count))
        .bind(i64::from(assignment.invalid_report_streak))
        .bind(i64::from(assignment.deadline_escalated))
        .bind(assignment.cancel_requested_at.map(format_datetime))
        .bind(assignment.completed_at.map(format_datetime))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Assignment>> {
        let row = sqlx::query("SELECT * FROM assignments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_assignment).transpose()
    }

    async fn update(&self, assignment: &Assignment) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE assignments SET
                status = ?, acked_at = ?, last_heartbeat_at = ?,
                last_progress_at = ?, progress_pct = ?, confidence = ?,
                stall_count = ?, invalid_report_streak = ?,
                deadline_escalated = ?, cancel_requested_at = ?,
                completed_at = ?
            WHERE id = ?",
        )
        .bind(assignment.status.as_str())
        .bind(assignment.acked_at.map(format_datetime))
        .bind(format_datetime(assignment.last_heartbeat_at))
        .bind(format_datetime(assignment.last_progress_at))
        .bind(i64::from(assignment.progress_pct))
        .bind(i64::from(assignment.confidence))
        .bind(i64::from(assignment.stall_count))
        .bind(i64::from(assignment.invalid_report_streak))
        .bind(i64::from(assignment.deadline_escalated))
        .bind(assignment.cancel_requested_at.map(format_datetime))
        .bind(assignment.completed_at.map(format_datetime))
        .bind(assignment.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AssignmentNotFound(assignment.id));
        }
        Ok(())
    }

    async fn get_active_for_task(&self, task_id: Uuid) -> DomainResult<Option<Assignment>> {
        let row = sqlx::query("SELECT * FROM assignments WHERE task_id = ? AND status = 'active'")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_assignment).transpose()
    }

    async fn list_active(&self) -> DomainResult<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments WHERE status = 'active' ORDER BY assigned_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_assignment).collect()
    }

    async fn list_active_by_agent(&self, agent_id: &str) -> DomainResult<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments
             WHERE agent_id = ? AND status = 'active' ORDER BY assigned_at",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_assignment).collect()
    }

    async fn list_by_task(&self, task_id: Uuid) -> DomainResult<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments WHERE task_id = ? ORDER BY assigned_at DESC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_assignment).collect()
    }
}
