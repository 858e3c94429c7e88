//! Task queue: durable backlog ordering tasks by readiness, priority, and
//! submission order.
//!
//! The queue owns every task until the scheduler withdraws it, and again
//! after completion, abandonment, or escalation returns it for
//! finalization. Withdrawal is the only multi-writer operation and is
//! serialized by compare-and-set in the store.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Assignment, Capability, Task, TaskOutcome, TaskStatus};
use crate::domain::ports::task_repository::{TaskRepository, WithdrawOutcome};
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::retry::RetryPolicy;

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Uuid),
    /// A task with the same idempotency key already exists
    AlreadyExists(Uuid),
}

impl SubmitOutcome {
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Accepted(id) | Self::AlreadyExists(id) => *id,
        }
    }
}

/// Result of a cancellation request at the queue level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was pending or ready and is now abandoned
    Abandoned,
    /// The task already sits in the given terminal state
    AlreadyTerminal(TaskStatus),
    /// The task is assigned or later; cancellation must go through the
    /// accountability path
    RequiresMonitor,
}

/// Queue depth and per-status counts for the operator surface.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub counts: HashMap<TaskStatus, u64>,
    pub live: u64,
}

/// Rank two ready tasks. Lexicographic, first key decides:
/// 1. deadline within the scheduling horizon beats no/far deadline,
/// 2. higher priority first,
/// 3. earlier submission first,
/// 4. id as the final deterministic tie-break.
pub fn compare_ready(a: &Task, b: &Task, now: DateTime<Utc>, horizon: chrono::Duration) -> Ordering {
    let urgent = |t: &Task| t.deadline.is_some_and(|d| d - now <= horizon);
    urgent(b)
        .cmp(&urgent(a))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Durable backlog of tasks.
pub struct TaskQueue {
    repo: Arc<dyn TaskRepository>,
    events: Arc<EventBus>,
    soft_cap: u64,
    horizon: chrono::Duration,
    cascade_upstream_failure: bool,
    retry: RetryPolicy,
    /// Tasks already flagged as pending-past-deadline, so the event fires
    /// once per task
    deadline_flagged: Mutex<HashSet<Uuid>>,
}

impl TaskQueue {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        events: Arc<EventBus>,
        soft_cap: u64,
        horizon: chrono::Duration,
        cascade_upstream_failure: bool,
    ) -> Self {
        Self {
            repo,
            events,
            soft_cap,
            horizon,
            cascade_upstream_failure,
            retry: RetryPolicy::default(),
            deadline_flagged: Mutex::new(HashSet::new()),
        }
    }

    pub fn repo(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    /// Submit a task: validate, compute initial readiness, persist.
    ///
    /// Rejections (`invalid-task`, `queue-full`) surface as errors and the
    /// task never enters the system. Re-submission under a known
    /// idempotency key returns the existing id.
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    pub async fn submit(&self, mut task: Task) -> DomainResult<SubmitOutcome> {
        task.validate()?;

        if let Some(ref key) = task.idempotency_key {
            if let Some(existing) = self.repo.get_by_idempotency_key(key).await? {
                debug!(task_id = %existing.id, key, "Submission deduplicated by idempotency key");
                return Ok(SubmitOutcome::AlreadyExists(existing.id));
            }
        }

        let live = self.repo.count_live().await?;
        if live >= self.soft_cap {
            return Err(DomainError::QueueFull(live));
        }

        // Prerequisites must exist and the graph must stay acyclic.
        let all_tasks = self.repo.list_all().await?;
        let by_id: HashMap<Uuid, &Task> = all_tasks.iter().map(|t| (t.id, t)).collect();
        for prereq in &task.prerequisites {
            if !by_id.contains_key(prereq) {
                return Err(DomainError::UnknownPrerequisite {
                    task: task.id,
                    prerequisite: *prereq,
                });
            }
        }
        detect_cycle(&task, &by_id)?;

        // Initial readiness
        let mut upstream_failed = None;
        let mut all_done = true;
        for prereq in &task.prerequisites {
            match by_id[prereq].status {
                TaskStatus::Completed => {}
                s if s.is_terminal() => {
                    upstream_failed = Some(*prereq);
                    all_done = false;
                }
                _ => all_done = false,
            }
        }

        if let Some(failed_prereq) = upstream_failed {
            if self.cascade_upstream_failure {
                task.failure_reason = Some(format!("upstream-failed: {failed_prereq}"));
                task.transition_to(TaskStatus::Failed)?;
            }
        } else if all_done {
            task.transition_to(TaskStatus::Ready)?;
        }

        let repo = Arc::clone(&self.repo);
        let stored = task.clone();
        self.retry
            .run("task_insert", || {
                let repo = Arc::clone(&repo);
                let task = stored.clone();
                async move { repo.insert(&task).await }
            })
            .await?;

        info!(task_id = %task.id, status = %task.status, "Task submitted");
        self.events.emit(EventPayload::TaskSubmitted {
            task_id: task.id,
            title: task.title.clone(),
            kind: task.kind.as_str().to_string(),
        });
        match task.status {
            TaskStatus::Ready => self.events.emit(EventPayload::TaskReady { task_id: task.id }),
            TaskStatus::Failed => self.events.emit(EventPayload::TaskFailed {
                task_id: task.id,
                reason: task.failure_reason.clone().unwrap_or_default(),
            }),
            _ => {}
        }
        Ok(SubmitOutcome::Accepted(task.id))
    }

    /// Ranked ready tasks matching a capability filter. Does not mutate
    /// state; `peek_ready` is the first element.
    pub async fn ready_tasks(
        &self,
        capabilities: Option<&std::collections::BTreeSet<Capability>>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .repo
            .list_by_status(TaskStatus::Ready)
            .await?
            .into_iter()
            .filter(|t| !t.blocked_on_resources)
            .filter(|t| capabilities.is_none_or(|caps| caps.contains(&t.kind)))
            .collect();
        tasks.sort_by(|a, b| compare_ready(a, b, now, self.horizon));
        Ok(tasks)
    }

    /// Highest-ranked ready task matching the filter, without mutation.
    pub async fn peek_ready(
        &self,
        capabilities: Option<&std::collections::BTreeSet<Capability>>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Task>> {
        Ok(self.ready_tasks(capabilities, now).await?.into_iter().next())
    }

    /// Compare-and-set withdrawal: move the task to `assigned` and create
    /// its assignment record as one bounded transaction.
    ///
    /// `Conflict` means another caller got there first; the task stays
    /// assignable on a later tick.
    #[instrument(skip(self, task, assignment), fields(task_id = %task.id))]
    pub async fn withdraw(
        &self,
        task: &mut Task,
        assignment: &Assignment,
    ) -> DomainResult<WithdrawOutcome> {
        if task.status != TaskStatus::Ready {
            return Ok(WithdrawOutcome::Conflict);
        }
        task.transition_to(TaskStatus::Assigned)?;
        match self.repo.withdraw_and_assign(task, assignment).await? {
            WithdrawOutcome::Withdrawn => Ok(WithdrawOutcome::Withdrawn),
            WithdrawOutcome::Conflict => {
                debug!(task_id = %task.id, "Withdraw lost the compare-and-set race");
                Ok(WithdrawOutcome::Conflict)
            }
        }
    }

    /// Finalize a task and unblock or fail its dependents.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn finish(&self, task_id: Uuid, outcome: TaskOutcome) -> DomainResult<Task> {
        let mut task = self
            .repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        if task.is_terminal() {
            return Ok(task);
        }

        if let Some(reason) = outcome.reason() {
            task.failure_reason = Some(reason.to_string());
        }
        let target = outcome.status();
        if task.can_transition_to(target) {
            task.transition_to(target)?;
        } else {
            task.force_status(target, "finish outcome outside normal lifecycle");
        }
        self.repo.update(&task).await?;

        match target {
            TaskStatus::Completed => {
                self.events.emit(EventPayload::TaskCompleted {
                    task_id,
                    agent_id: None,
                });
                self.unblock_dependents(task_id).await?;
            }
            TaskStatus::Failed => {
                self.events.emit(EventPayload::TaskFailed {
                    task_id,
                    reason: task.failure_reason.clone().unwrap_or_default(),
                });
                self.fail_dependents(task_id).await?;
            }
            TaskStatus::Abandoned => {
                self.events.emit(EventPayload::TaskAbandoned {
                    task_id,
                    reason: task.failure_reason.clone().unwrap_or_default(),
                });
                self.fail_dependents(task_id).await?;
            }
            _ => {}
        }
        Ok(task)
    }

    /// Abandon a pending or ready task. Idempotent: a terminal task
    /// reports the state it already reached.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: Uuid, reason: &str) -> DomainResult<CancelOutcome> {
        let mut task = self
            .repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        if task.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(task.status));
        }
        if task.status.has_active_assignment() {
            return Ok(CancelOutcome::RequiresMonitor);
        }

        task.failure_reason = Some(reason.to_string());
        task.transition_to(TaskStatus::Abandoned)?;
        self.repo.update(&task).await?;
        info!(task_id = %task_id, reason, "Task abandoned by cancellation");
        self.events.emit(EventPayload::TaskAbandoned {
            task_id,
            reason: reason.to_string(),
        });
        self.fail_dependents(task_id).await?;
        Ok(CancelOutcome::Abandoned)
    }

    /// Mark tasks whose requirement cannot currently be admitted. The flag
    /// keeps them out of `ready_tasks` until the next ledger release.
    pub async fn mark_blocked_on_resources(&self, task_id: Uuid) -> DomainResult<()> {
        let mut task = self
            .repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        if task.blocked_on_resources {
            return Ok(());
        }
        task.blocked_on_resources = true;
        task.touch();
        self.repo.update(&task).await?;
        self.events
            .emit(EventPayload::TaskBlockedOnResources { task_id });
        Ok(())
    }

    /// Clear every resource block. Called whenever a reservation is
    /// released so blocked tasks are re-evaluated.
    pub async fn clear_resource_blocks(&self) -> DomainResult<usize> {
        let mut cleared = 0;
        for mut task in self.repo.list_by_status(TaskStatus::Ready).await? {
            if task.blocked_on_resources {
                task.blocked_on_resources = false;
                task.touch();
                self.repo.update(&task).await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Surface pending/ready tasks sitting past their soft deadline.
    /// The queue never enforces deadlines; it only reports them.
    pub async fn flag_overdue(&self, now: DateTime<Utc>) -> DomainResult<usize> {
        let mut flagged = 0;
        let mut seen = self.deadline_flagged.lock().await;
        for status in [TaskStatus::Pending, TaskStatus::Ready] {
            for task in self.repo.list_by_status(status).await? {
                let Some(deadline) = task.deadline else {
                    continue;
                };
                if now > deadline && seen.insert(task.id) {
                    self.events.emit(EventPayload::TaskDeadlinePassed {
                        task_id: task.id,
                        deadline,
                    });
                    flagged += 1;
                }
            }
        }
        Ok(flagged)
    }

    /// Queue depth and per-status counts.
    pub async fn stats(&self) -> DomainResult<QueueStats> {
        Ok(QueueStats {
            counts: self.repo.count_by_status().await?,
            live: self.repo.count_live().await?,
        })
    }

    /// Move pending dependents whose prerequisites all completed to ready.
    async fn unblock_dependents(&self, completed_task_id: Uuid) -> DomainResult<()> {
        for mut dependent in self.repo.get_dependents(completed_task_id).await? {
            if dependent.status != TaskStatus::Pending {
                continue;
            }
            let mut all_done = true;
            for prereq in &dependent.prerequisites {
                let prereq_task = self
                    .repo
                    .get(*prereq)
                    .await?
                    .ok_or(DomainError::TaskNotFound(*prereq))?;
                if prereq_task.status != TaskStatus::Completed {
                    all_done = false;
                    break;
                }
            }
            if all_done {
                dependent.transition_to(TaskStatus::Ready)?;
                self.repo.update(&dependent).await?;
                info!(task_id = %dependent.id, "Dependent task ready");
                self.events.emit(EventPayload::TaskReady {
                    task_id: dependent.id,
                });
            }
        }
        Ok(())
    }

    /// Cascade an upstream terminal failure to dependents, recursively.
    fn fail_dependents<'a>(
        &'a self,
        failed_task_id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = DomainResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if !self.cascade_upstream_failure {
                return Ok(());
            }
            for mut dependent in self.repo.get_dependents(failed_task_id).await? {
                if dependent.is_terminal() || dependent.status.has_active_assignment() {
                    continue;
                }
                warn!(
                    task_id = %dependent.id,
                    upstream = %failed_task_id,
                    "Failing dependent task after upstream failure"
                );
                dependent.failure_reason = Some(format!("upstream-failed: {failed_task_id}"));
                dependent.transition_to(TaskStatus::Failed)?;
                self.repo.update(&dependent).await?;
                self.events.emit(EventPayload::TaskFailed {
                    task_id: dependent.id,
                    reason: dependent.failure_reason.clone().unwrap_or_default(),
                });
                self.fail_dependents(dependent.id).await?;
            }
            Ok(())
        })
    }
}

/// Depth-first cycle check over the prerequisite graph including the task
/// being submitted.
fn detect_cycle(candidate: &Task, by_id: &HashMap<Uuid, &Task>) -> DomainResult<()> {
    let mut stack = vec![(candidate.id, candidate.prerequisites.clone())];
    let mut visiting = HashSet::from([candidate.id]);
    let mut visited: HashSet<Uuid> = HashSet::new();

    while let Some((id, mut remaining)) = stack.pop() {
        match remaining.pop() {
            None => {
                visiting.remove(&id);
                visited.insert(id);
            }
            Some(next) => {
                stack.push((id, remaining));
                if visiting.contains(&next) {
                    return Err(DomainError::DependencyCycle(next));
                }
                if visited.contains(&next) {
                    continue;
                }
                if let Some(task) = by_id.get(&next) {
                    visiting.insert(next);
                    stack.push((next, task.prerequisites.clone()));
                }
            }
        }
    }
    Ok(())
}
