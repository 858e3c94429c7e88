//! Task repository port.
//!
//! The `tasks` collection of the durable store, including the secondary
//! tasks-by-status index and the bounded two-item transaction that moves a
//! task to `assigned` and creates its assignment record as one step.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{Assignment, Task, TaskStatus};

/// Result of the atomic withdraw-and-assign transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// The task moved to `assigned` and the assignment record exists
    Withdrawn,
    /// Another caller withdrew or mutated the task first
    Conflict,
}

/// Repository interface for task persistence.
///
/// `update` is a compare-and-set: the caller bumps `task.version` through a
/// domain mutation helper and the store accepts the write only if the
/// persisted version is exactly one behind. A mismatch surfaces as
/// `DomainError::ConcurrencyConflict`.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task. Fails on duplicate id.
    async fn insert(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Compare-and-set update of an existing task.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// List tasks by status (secondary index).
    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>>;

    /// List every task.
    async fn list_all(&self) -> DomainResult<Vec<Task>>;

    /// Tasks that name the given task as a prerequisite.
    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Task>>;

    /// Look up a task by idempotency key.
    async fn get_by_idempotency_key(&self, key: &str) -> DomainResult<Option<Task>>;

    /// Count tasks per status.
    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>>;

    /// Count live (non-terminal) tasks, for the queue soft cap.
    async fn count_live(&self) -> DomainResult<u64>;

    /// Bounded two-item transaction: compare-and-set the task into
    /// `assigned` and insert its assignment record atomically.
    ///
    /// The task passed in must already carry the `Assigned` status and the
    /// bumped version; the store checks the previous version and a `ready`
    /// persisted status before committing.
    async fn withdraw_and_assign(
        &self,
        task: &Task,
        assignment: &Assignment,
    ) -> DomainResult<WithdrawOutcome>;
}
