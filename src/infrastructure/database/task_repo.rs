//! SQLite implementation of the task repository.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Assignment, Capability, ResourceSpec, Task, TaskStatus};
use crate::domain::ports::task_repository::{TaskRepository, WithdrawOutcome};
use crate::infrastructure::database::utils::{format_datetime, parse_datetime, parse_datetime_opt};

/// SQLite implementation of `TaskRepository` using sqlx.
pub struct TaskRepositoryImpl {
    pool: SqlitePool,
}

impl TaskRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Convert a database row to a `Task`.
    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Task> {
        let status_str: String = row.get("status");
        let status = TaskStatus::from_str(&status_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown task status {status_str:?}"))
        })?;
        let prerequisites: Vec<Uuid> =
            serde_json::from_str(row.get::<String, _>("prerequisites").as_str())?;

        Ok(Task {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            title: row.get("title"),
            description: row.get("description"),
            kind: Capability::new(row.get::<String, _>("kind")),
            priority: row.get::<i64, _>("priority") as i32,
            status,
            prerequisites,
            parent_id: row
                .get::<Option<String>, _>("parent_id")
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok()),
            prior_assignment_id: row
                .get::<Option<String>, _>("prior_assignment_id")
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok()),
            reassignment_count: row.get::<i64, _>("reassignment_count") as u32,
            escalation_count: row.get::<i64, _>("escalation_count") as u32,
            resources: ResourceSpec {
                cpu_cores: row.get::<i64, _>("cpu_cores") as u32,
                memory_mb: row.get::<i64, _>("memory_mb") as u64,
                disk_mb: row.get::<i64, _>("disk_mb") as u64,
                network_mbps: row.get::<i64, _>("network_mbps") as u64,
            },
            estimated_duration_secs: row.get::<i64, _>("estimated_duration_secs") as u32,
            blocked_on_resources: row.get::<i64, _>("blocked_on_resources") != 0,
            idempotency_key: row.get("idempotency_key"),
            failure_reason: row.get("failure_reason"),
            submitted_at: parse_datetime(row.get::<String, _>("submitted_at").as_str())?,
            deadline: parse_datetime_opt(row.get::<Option<String>, _>("deadline").as_deref())?,
            started_at: parse_datetime_opt(row.get::<Option<String>, _>("started_at").as_deref())?,
            completed_at: parse_datetime_opt(
                row.get::<Option<String>, _>("completed_at").as_deref(),
            )?,
            updated_at: parse_datetime(row.get::<String, _>("updated_at").as_str())?,
            version: row.get::<i64, _>("version") as u64,
        })
    }
}

/// Bind every column of a task to an INSERT or UPDATE statement.
///
/// Kept as a macro-free helper returning the bound values so the two call
/// sites stay in sync with the column list.
struct TaskRow {
    id: String,
    kind: String,
    status: String,
    prerequisites: String,
    parent_id: Option<String>,
    prior_assignment_id: Option<String>,
    submitted_at: String,
    deadline: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl TaskRow {
    fn from_task(task: &Task) -> DomainResult<Self> {
        Ok(Self {
            id: task.id.to_string(),
            kind: task.kind.as_str().to_string(),
            status: task.status.as_str().to_string(),
            prerequisites: serde_json::to_string(&task.prerequisites)?,
            parent_id: task.parent_id.map(|id| id.to_string()),
            prior_assignment_id: task.prior_assignment_id.map(|id| id.to_string()),
            submitted_at: format_datetime(task.submitted_at),
            deadline: task.deadline.map(format_datetime),
            started_at: task.started_at.map(format_datetime),
            completed_at: task.completed_at.map(format_datetime),
            updated_at: format_datetime(task.updated_at),
        })
    }
}

const INSERT_TASK_SQL: &str = "INSERT INTO tasks (
        id, title, description, kind, priority, status, prerequisites,
        parent_id, prior_assignment_id, reassignment_count, escalation_count,
        cpu_cores, memory_mb, disk_mb, network_mbps, estimated_duration_secs,
        blocked_on_resources, idempotency_key, failure_reason, submitted_at,
        deadline, started_at, completed_at, updated_at, version
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPDATE_TASK_SQL: &str = "UPDATE tasks SET
        title = ?, description = ?, kind = ?, priority = ?, status = ?,
        prerequisites = ?, parent_id = ?, prior_assignment_id = ?,
        reassignment_count = ?, escalation_count = ?, cpu_cores = ?,
        memory_mb = ?, disk_mb = ?, network_mbps = ?,
        estimated_duration_secs = ?, blocked_on_resources = ?,
        idempotency_key = ?, failure_reason = ?, submitted_at = ?,
        deadline = ?, started_at = ?, completed_at = ?, updated_at = ?,
        version = ?
    WHERE id = ? AND version = ?";

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        let r = TaskRow::from_task(task)?;
        sqlx::query(INSERT_TASK_SQL)
            .bind(&r.id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(&r.kind)
            .bind(i64::from(task.priority))
            .bind(&r.status)
            .bind(&r.prerequisites)
            .bind(&r.parent_id)
            .bind(&r.prior_assignment_id)
            .bind(i64::from(task.reassignment_count))
            .bind(i64::from(task.escalation_count))
            .bind(i64::from(task.resources.cpu_cores))
            .bind(task.resources.memory_mb as i64)
            .bind(task.resources.disk_mb as i64)
            .bind(task.resources.network_mbps as i64)
            .bind(i64::from(task.estimated_duration_secs))
            .bind(i64::from(task.blocked_on_resources))
            .bind(&task.idempotency_key)
            .bind(&task.failure_reason)
            .bind(&r.submitted_at)
            .bind(&r.deadline)
            .bind(&r.started_at)
            .bind(&r.completed_at)
            .bind(&r.updated_at)
            .bind(task.version as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let id_str = id.to_string();
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let r = TaskRow::from_task(task)?;
        let expected_version = (task.version as i64) - 1;
        let result = sqlx::query(UPDATE_TASK_SQL)
            .bind(&task.title)
            .bind(&task.description)
            .bind(&r.kind)
            .bind(i64::from(task.priority))
            .bind(&r.status)
            .bind(&r.prerequisites)
            .bind(&r.parent_id)
            .bind(&r.prior_assignment_id)
            .bind(i64::from(task.reassignment_count))
            .bind(i64::from(task.escalation_count))
            .bind(i64::from(task.resources.cpu_cores))
            .bind(task.resources.memory_mb as i64)
            .bind(task.resources.disk_mb as i64)
            .bind(task.resources.network_mbps as i64)
            .bind(i64::from(task.estimated_duration_secs))
            .bind(i64::from(task.blocked_on_resources))
            .bind(&task.idempotency_key)
            .bind(&task.failure_reason)
            .bind(&r.submitted_at)
            .bind(&r.deadline)
            .bind(&r.started_at)
            .bind(&r.completed_at)
            .bind(&r.updated_at)
            .bind(task.version as i64)
            .bind(&r.id)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict {
                entity: "task",
                id: r.id,
            });
        }
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY submitted_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY submitted_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Task>> {
        // Prerequisites are a JSON array of UUID strings; a LIKE match on the
        // quoted id is precise because UUIDs never substring one another.
        let pattern = format!("%\"{task_id}\"%");
        let rows = sqlx::query("SELECT * FROM tasks WHERE prerequisites LIKE ?")
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_by_idempotency_key(&self, key: &str) -> DomainResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let status_str: String = row.get("status");
            if let Some(status) = TaskStatus::from_str(&status_str) {
                counts.insert(status, row.get::<i64, _>("n") as u64);
            }
        }
        Ok(counts)
    }

    async fn count_live(&self) -> DomainResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM tasks
             WHERE status NOT IN ('completed', 'failed', 'abandoned', 'escalated_to_human')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn withdraw_and_assign(
        &self,
        task: &Task,
        assignment: &Assignment,
    ) -> DomainResult<WithdrawOutcome> {
        let r = TaskRow::from_task(task)?;
        let expected_version = (task.version as i64) - 1;

        let mut tx = self.pool.begin().await?;

        // Compare-and-set: the persisted row must still be ready at the
        // version the scheduler observed.
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ?, version = ?
             WHERE id = ? AND version = ? AND status = 'ready'",
        )
        .bind(&r.status)
        .bind(&r.updated_at)
        .bind(task.version as i64)
        .bind(&r.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(WithdrawOutcome::Conflict);
        }

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
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WithdrawOutcome::Withdrawn)
    }
}
