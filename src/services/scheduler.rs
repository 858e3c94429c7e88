//! Coordinator: matches ready tasks to registered agents once per tick.
//!
//! A tick snapshots healthy agents and the resource ledger, offers each
//! agent its best capability-matching ready task, scores the pair through
//! the configured policy, and on acceptance reserves resources and
//! withdraws the task atomically. Failures along the way release partial
//! state and leave the task for the next tick.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::domain::models::{Assignment, AssignmentStatus, PolicyKind, Task, TaskStatus};
use crate::domain::ports::task_repository::WithdrawOutcome;
use crate::domain::ports::{AssignmentRepository, SchedulingHistory, WeightAdvisor};
use crate::services::agent_registry::{AgentFilter, AgentRegistry};
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::resource_manager::{ReserveOutcome, ResourceManager};
use crate::services::scheduling_policy::{
    build_policy, normalize_weights, PolicyContext, SchedulingPolicy,
};
use crate::services::task_queue::TaskQueue;

/// What one scheduling tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub dispatched: usize,
    pub no_fit: usize,
    pub conflicts: usize,
    pub resource_rejections: usize,
    pub lost_dispatches_recovered: usize,
}

/// The scheduling half of the cooperative loop.
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    registry: Arc<AgentRegistry>,
    resources: Arc<ResourceManager>,
    assignments: Arc<dyn AssignmentRepository>,
    events: Arc<EventBus>,
    policy: RwLock<Box<dyn SchedulingPolicy>>,
    advisor: Option<Arc<dyn WeightAdvisor>>,
    history: Arc<Mutex<SchedulingHistory>>,
    completion_timeout_multiplier: f64,
    ack_timeout: chrono::Duration,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<AgentRegistry>,
        resources: Arc<ResourceManager>,
        assignments: Arc<dyn AssignmentRepository>,
        events: Arc<EventBus>,
        policy_kind: PolicyKind,
        advisor: Option<Arc<dyn WeightAdvisor>>,
        history: Arc<Mutex<SchedulingHistory>>,
        completion_timeout_multiplier: f64,
        ack_timeout: chrono::Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            resources,
            assignments,
            events,
            policy: RwLock::new(build_policy(policy_kind)),
            advisor,
            history,
            completion_timeout_multiplier,
            ack_timeout,
        }
    }

    /// Swap the scheduling policy at runtime (operator surface).
    pub async fn set_policy(&self, kind: PolicyKind) {
        let mut policy = self.policy.write().await;
        *policy = build_policy(kind);
        info!(policy = kind.as_str(), "Scheduling policy changed");
        self.events.emit(EventPayload::PolicyChanged {
            policy: kind.as_str().to_string(),
        });
    }

    /// Run one scheduling tick.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let mut summary = TickSummary::default();

        summary.lost_dispatches_recovered = self
            .recover_lost_dispatches(now)
            .await
            .context("Failed to recover lost dispatches")?;

        // Snapshot: healthy agents with spare capacity, plus ledger totals.
        let mut candidates = self
            .registry
            .list(&AgentFilter {
                capability: None,
                health: Some(crate::domain::models::AgentHealth::Healthy),
                min_free_capacity: Some(1),
            })
            .await
            .context("Failed to list candidate agents")?;

        if candidates.is_empty() {
            debug!("No healthy agents with spare capacity; tick is a no-op");
            return Ok(summary);
        }

        let snapshot = self.resources.snapshot().await;
        let weights = self.current_weights(&candidates).await;
        let policy = self.policy.read().await;
        let ctx = PolicyContext {
            snapshot: &snapshot,
            weights: &weights,
        };

        policy.order_agents(&mut candidates, &ctx);

        for agent in &candidates {
            // Offer this agent its best non-excluded capability match.
            let ready = self
                .queue
                .ready_tasks(Some(&agent.capabilities), now)
                .await
                .context("Failed to peek ready tasks")?;

            let mut candidate_task = None;
            for task in ready {
                if self.is_excluded(&task, &agent.id).await? {
                    continue;
                }
                candidate_task = Some(task);
                break;
            }
            let Some(mut task) = candidate_task else {
                continue;
            };

            let fit = policy.fit(&task, agent, &ctx);
            if !fit.acceptable {
                summary.no_fit += 1;
                self.events.emit(EventPayload::PolicyNoFit {
                    task_id: task.id,
                    agent_id: agent.id.clone(),
                    policy: policy.name().to_string(),
                });
                continue;
            }

            match self
                .resources
                .reserve(&agent.id, Some(task.id), task.resources)
                .await?
            {
                ReserveOutcome::Insufficient => {
                    summary.resource_rejections += 1;
                    // A requirement no idle system could ever admit is
                    // parked until a release re-evaluates it; a merely
                    // busy system retries next tick.
                    if !task.resources.fits_within(&self.resources.limits()) {
                        self.queue.mark_blocked_on_resources(task.id).await?;
                    }
                    continue;
                }
                ReserveOutcome::Reserved(allocation_id) => {
                    let assignment = Assignment::new(
                        &task,
                        &agent.id,
                        allocation_id,
                        self.completion_timeout_multiplier,
                    );
                    match self.queue.withdraw(&mut task, &assignment).await? {
                        WithdrawOutcome::Conflict => {
                            summary.conflicts += 1;
                            self.resources.release(allocation_id).await?;
                        }
                        WithdrawOutcome::Withdrawn => {
                            self.registry.adjust_load(&agent.id, 1).await?;
                            self.history.lock().await.record_dispatch(&agent.id);
                            summary.dispatched += 1;
                            info!(
                                task_id = %task.id,
                                agent_id = %agent.id,
                                assignment_id = %assignment.id,
                                score = fit.score,
                                "Task dispatched"
                            );
                            self.events.emit(EventPayload::TaskAssigned {
                                task_id: task.id,
                                agent_id: agent.id.clone(),
                                assignment_id: assignment.id,
                            });
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Whether the task's provenance excludes this agent (the previous
    /// holder of a reassigned task never gets it again directly).
    async fn is_excluded(&self, task: &Task, agent_id: &str) -> Result<bool> {
        let Some(prior_id) = task.prior_assignment_id else {
            return Ok(false);
        };
        let prior = self
            .assignments
            .get(prior_id)
            .await
            .context("Failed to load prior assignment")?;
        Ok(prior.is_some_and(|a| a.agent_id == agent_id))
    }

    /// Current normalized weights: external advice when valid, otherwise
    /// the persisted operator weights.
    async fn current_weights(
        &self,
        agents: &[crate::domain::models::AgentDescriptor],
    ) -> HashMap<String, f64> {
        if let Some(ref advisor) = self.advisor {
            let history = self.history.lock().await;
            if let Some(advice) = advisor.advise(&history).await {
                let normalized = normalize_weights(&advice, agents);
                if !normalized.is_empty() {
                    return normalized;
                }
                warn!("Weight advisor returned invalid or stale advice; ignoring");
            }
        }
        let persisted: HashMap<String, f64> =
            agents.iter().map(|a| (a.id.clone(), a.weight)).collect();
        normalize_weights(&persisted, agents)
    }

    /// Treat never-acknowledged dispatches past the ack window as lost:
    /// the assignment is superseded, resources are freed, and the task
    /// returns to the queue without burning a reassignment attempt.
    async fn recover_lost_dispatches(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut recovered = 0;
        for mut assignment in self.assignments.list_active().await? {
            if assignment.acked_at.is_some() || now - assignment.assigned_at <= self.ack_timeout {
                continue;
            }
            warn!(
                assignment_id = %assignment.id,
                agent_id = %assignment.agent_id,
                "Dispatch never acknowledged, treating as lost"
            );
            assignment.conclude(AssignmentStatus::Superseded);
            self.assignments.update(&assignment).await?;
            self.resources.release(assignment.allocation_id).await?;
            self.registry.adjust_load(&assignment.agent_id, -1).await?;

            if let Some(mut task) = self.queue.repo().get(assignment.task_id).await? {
                if task.status.has_active_assignment() {
                    task.prior_assignment_id = Some(assignment.id);
                    task.transition_to(TaskStatus::Ready)?;
                    self.queue.repo().update(&task).await?;
                    self.events.emit(EventPayload::TaskReady { task_id: task.id });
                }
            }
            self.events.emit(EventPayload::DispatchLost {
                assignment_id: assignment.id,
                agent_id: assignment.agent_id.clone(),
            });
            recovered += 1;
        }
        Ok(recovered)
    }
}
