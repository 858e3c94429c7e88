//! SQLite implementation of the escalation repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{
    Escalation, EscalationAction, EscalationCause, EscalationSeverity,
};
use crate::domain::ports::EscalationRepository;
use crate::infrastructure::database::utils::{format_datetime, parse_datetime, parse_datetime_opt};

/// SQLite implementation of `EscalationRepository` using sqlx.
pub struct EscalationRepositoryImpl {
    pool: SqlitePool,
}

impl EscalationRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_escalation(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Escalation> {
        let severity_str: String = row.get("severity");
        let severity = EscalationSeverity::parse_str(&severity_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown severity {severity_str:?}"))
        })?;
        let cause_str: String = row.get("cause");
        let cause = EscalationCause::parse_str(&cause_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown cause {cause_str:?}"))
        })?;
        let action_str: String = row.get("action");
        let action = EscalationAction::parse_str(&action_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown action {action_str:?}"))
        })?;

        Ok(Escalation {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            task_id: Uuid::parse_str(row.get::<String, _>("task_id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            agent_id: row.get("agent_id"),
            severity,
            cause,
            action,
            resolved: row.get::<i64, _>("resolved") != 0,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
            resolved_at: parse_datetime_opt(
                row.get::<Option<String>, _>("resolved_at").as_deref(),
            )?,
        })
    }
}

#[async_trait]
impl EscalationRepository for EscalationRepositoryImpl {
    async fn insert(&self, escalation: &Escalation) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO escalations (
                id, task_id, agent_id, severity, cause, action, resolved,
                created_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(escalation.id.to_string())
        .bind(escalation.task_id.to_string())
        .bind(&escalation.agent_id)
        .bind(escalation.severity.as_str())
        .bind(escalation.cause.as_str())
        .bind(escalation.action.as_str())
        .bind(i64::from(escalation.resolved))
        .bind(format_datetime(escalation.created_at))
        .bind(escalation.resolved_at.map(format_datetime))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Escalation>> {
        let row = sqlx::query("SELECT * FROM escalations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_escalation).transpose()
    }

    async fn update(&self, escalation: &Escalation) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE escalations SET resolved = ?, resolved_at = ? WHERE id = ?",
        )
        .bind(i64::from(escalation.resolved))
        .bind(escalation.resolved_at.map(format_datetime))
        .bind(escalation.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::EscalationNotFound(escalation.id));
        }
        Ok(())
    }

    async fn list_unresolved(&self) -> DomainResult<Vec<Escalation>> {
        let rows = sqlx::query(
            "SELECT * FROM escalations WHERE resolved = 0 ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_escalation).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<Escalation>> {
        let rows = sqlx::query("SELECT * FROM escalations ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_escalation).collect()
    }

    async fn list_by_task(&self, task_id: Uuid) -> DomainResult<Vec<Escalation>> {
        let rows = sqlx::query(
            "SELECT * FROM escalations WHERE task_id = ? ORDER BY created_at",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_escalation).collect()
    }
}
