//! Agent registry: live agents, capabilities, health, current load.
//!
//! Descriptors survive unresponsiveness so the monitor can reassign a dead
//! agent's work; they are removed only by deregistration, which drains
//! first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{AgentDescriptor, AgentHealth, Capability, CoreConfig};
use crate::domain::ports::{AgentRepository, AssignmentRepository};
use crate::services::event_bus::{EventBus, EventPayload};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// The id is already taken
    Conflict,
}

/// Filter criteria for listing agents.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub capability: Option<Capability>,
    pub health: Option<AgentHealth>,
    pub min_free_capacity: Option<u32>,
}

/// Registry of live agents backed by the agents collection.
pub struct AgentRegistry {
    repo: Arc<dyn AgentRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    events: Arc<EventBus>,
    heartbeat_interval: chrono::Duration,
    response_timeout: chrono::Duration,
}

impl AgentRegistry {
    pub fn new(
        repo: Arc<dyn AgentRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        events: Arc<EventBus>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            repo,
            assignments,
            events,
            heartbeat_interval: config.heartbeat_interval(),
            response_timeout: config.response_timeout(),
        }
    }

    /// Register a new agent. Rejects duplicate ids.
    #[instrument(skip(self, descriptor), fields(agent_id = %descriptor.id))]
    pub async fn register(&self, descriptor: AgentDescriptor) -> DomainResult<RegisterOutcome> {
        descriptor.validate()?;
        if !self.repo.try_insert(&descriptor).await? {
            return Ok(RegisterOutcome::Conflict);
        }
        info!(
            agent_id = %descriptor.id,
            capacity = descriptor.capacity,
            "Agent registered"
        );
        self.events.emit(EventPayload::AgentRegistered {
            agent_id: descriptor.id.clone(),
            capabilities: descriptor
                .capabilities
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
        });
        Ok(RegisterOutcome::Registered)
    }

    /// Record a heartbeat and recompute health.
    ///
    /// The optional health signal lets an agent drain itself; any other
    /// self-reported value is ignored in favor of the derived health.
    #[instrument(skip(self))]
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        timestamp: DateTime<Utc>,
        health_signal: Option<AgentHealth>,
    ) -> DomainResult<()> {
        let mut agent = self
            .repo
            .get(agent_id)
            .await?
            .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;

        let was = agent.health;
        agent.last_heartbeat_at = timestamp;
        if health_signal == Some(AgentHealth::Drained) {
            agent.health = AgentHealth::Drained;
        } else if agent.health != AgentHealth::Drained {
            agent.health = AgentHealth::Healthy;
        }
        self.repo.update(&agent).await?;

        if was == AgentHealth::Unresponsive && agent.health == AgentHealth::Healthy {
            info!(agent_id, "Agent recovered after heartbeat silence");
            self.events.emit(EventPayload::AgentRecovered {
                agent_id: agent_id.to_string(),
            });
        } else if was != AgentHealth::Drained && agent.health == AgentHealth::Drained {
            self.events.emit(EventPayload::AgentDrained {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(())
    }

    /// Re-derive health for every agent from heartbeat age.
    ///
    /// Returns the agents that newly became unresponsive so the monitor can
    /// reassign their work.
    pub async fn refresh_health(&self, now: DateTime<Utc>) -> DomainResult<Vec<AgentDescriptor>> {
        let mut newly_unresponsive = Vec::new();
        for mut agent in self.repo.list_all().await? {
            let derived = agent.derive_health(now, self.heartbeat_interval, self.response_timeout);
            if derived == agent.health {
                continue;
            }
            let was = agent.health;
            agent.health = derived;
            self.repo.update(&agent).await?;
            if derived == AgentHealth::Unresponsive {
                warn!(agent_id = %agent.id, "Agent unresponsive, its work will be reassigned");
                self.events.emit(EventPayload::AgentUnresponsive {
                    agent_id: agent.id.clone(),
                });
                newly_unresponsive.push(agent);
            } else {
                tracing::debug!(
                    agent_id = %agent.id,
                    from = %was,
                    to = %derived,
                    "Agent health changed"
                );
            }
        }
        Ok(newly_unresponsive)
    }

    /// List agents matching a filter.
    pub async fn list(&self, filter: &AgentFilter) -> DomainResult<Vec<AgentDescriptor>> {
        let agents = self.repo.list_all().await?;
        Ok(agents
            .into_iter()
            .filter(|a| {
                filter
                    .capability
                    .as_ref()
                    .is_none_or(|c| a.capabilities.contains(c))
                    && filter.health.is_none_or(|h| a.health == h)
                    && filter
                        .min_free_capacity
                        .is_none_or(|min| a.free_capacity() >= min)
            })
            .collect())
    }

    /// Get a single descriptor.
    pub async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentDescriptor>> {
        self.repo.get(agent_id).await
    }

    /// Drain an agent: no new assignments, existing ones may finish.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn drain(&self, agent_id: &str) -> DomainResult<()> {
        let mut agent = self
            .repo
            .get(agent_id)
            .await?
            .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;
        if agent.health == AgentHealth::Drained {
            return Ok(());
        }
        agent.health = AgentHealth::Drained;
        self.repo.update(&agent).await?;
        self.events.emit(EventPayload::AgentDrained {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Deregister an agent. Drains first; the descriptor is removed only
    /// when no active assignments remain.
    #[instrument(skip(self))]
    pub async fn deregister(&self, agent_id: &str) -> DomainResult<()> {
        self.drain(agent_id).await?;
        let active = self.assignments.list_active_by_agent(agent_id).await?;
        if !active.is_empty() {
            info!(
                agent_id,
                active = active.len(),
                "Deregistration deferred: agent drained, assignments still active"
            );
            return Ok(());
        }
        self.repo.delete(agent_id).await?;
        self.events.emit(EventPayload::AgentDeregistered {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Adjust the load counter after dispatch or conclusion.
    ///
    /// The load invariant (`current_load <= capacity`) is enforced here;
    /// a violation is a scheduler bug surfaced loudly.
    pub async fn adjust_load(&self, agent_id: &str, delta: i64) -> DomainResult<()> {
        let mut agent = self
            .repo
            .get(agent_id)
            .await?
            .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;
        let new_load = i64::from(agent.current_load) + delta;
        if new_load < 0 {
            warn!(agent_id, delta, "Load adjustment below zero, clamping");
            agent.current_load = 0;
        } else if new_load > i64::from(agent.capacity) {
            return Err(DomainError::ValidationFailed(format!(
                "agent {agent_id} load {new_load} would exceed capacity {}",
                agent.capacity
            )));
        } else {
            agent.current_load = new_load as u32;
        }
        self.repo.update(&agent).await
    }

    /// Persist operator-assigned scheduling weights.
    pub async fn set_weights(
        &self,
        weights: &std::collections::HashMap<String, f64>,
    ) -> DomainResult<()> {
        for (agent_id, weight) in weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(DomainError::ValidationFailed(format!(
                    "weight for agent {agent_id} must be positive and finite, got {weight}"
                )));
            }
            let mut agent = self
                .repo
                .get(agent_id)
                .await?
                .ok_or_else(|| DomainError::AgentNotFound(agent_id.clone()))?;
            agent.weight = *weight;
            self.repo.update(&agent).await?;
        }
        Ok(())
    }
}
