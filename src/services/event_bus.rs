//! Event bus for the append-only domain event stream.
//!
//! A broadcast-based stream with sequence numbering. External dashboards
//! and persistent observers subscribe; publishing never blocks, and a slow
//! subscriber only loses its own events.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{EscalationCause, EscalationSeverity};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Event category for filtering and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Orchestrator,
    Task,
    Agent,
    Assignment,
    Resource,
    Scheduler,
    Monitor,
    Escalation,
}

/// Domain event payloads covering the whole event surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    // Orchestrator lifecycle
    OrchestratorStarted,
    OrchestratorStopped,

    // Task lifecycle
    TaskSubmitted {
        task_id: Uuid,
        title: String,
        kind: String,
    },
    TaskReady {
        task_id: Uuid,
    },
    TaskAssigned {
        task_id: Uuid,
        agent_id: String,
        assignment_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        agent_id: Option<String>,
    },
    TaskFailed {
        task_id: Uuid,
        reason: String,
    },
    TaskAbandoned {
        task_id: Uuid,
        reason: String,
    },
    TaskEscalatedToHuman {
        task_id: Uuid,
    },
    TaskReassigned {
        task_id: Uuid,
        from_agent: String,
        attempt: u32,
    },
    TaskBlockedOnResources {
        task_id: Uuid,
    },
    TaskDeadlinePassed {
        task_id: Uuid,
        deadline: DateTime<Utc>,
    },
    TaskCancelRequested {
        task_id: Uuid,
        reason: String,
    },

    // Agent lifecycle
    AgentRegistered {
        agent_id: String,
        capabilities: Vec<String>,
    },
    AgentDeregistered {
        agent_id: String,
    },
    AgentDrained {
        agent_id: String,
    },
    AgentUnresponsive {
        agent_id: String,
    },
    AgentRecovered {
        agent_id: String,
    },

    // Resource ledger
    ReservationGranted {
        allocation_id: Uuid,
        agent_id: String,
    },
    ReservationReleased {
        allocation_id: Uuid,
    },

    // Scheduler decisions
    PolicyNoFit {
        task_id: Uuid,
        agent_id: String,
        policy: String,
    },
    DispatchLost {
        assignment_id: Uuid,
        agent_id: String,
    },
    PolicyChanged {
        policy: String,
    },

    // Monitor
    EscalationRaised {
        escalation_id: Uuid,
        task_id: Uuid,
        severity: EscalationSeverity,
        cause: EscalationCause,
    },
}

impl EventPayload {
    /// Severity carried into the envelope.
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::TaskReady { .. } | Self::ReservationGranted { .. } | Self::ReservationReleased { .. } => {
                EventSeverity::Debug
            }
            Self::TaskFailed { .. } | Self::DispatchLost { .. } => EventSeverity::Error,
            Self::TaskEscalatedToHuman { .. } => EventSeverity::Critical,
            Self::TaskReassigned { .. }
            | Self::TaskBlockedOnResources { .. }
            | Self::TaskDeadlinePassed { .. }
            | Self::AgentUnresponsive { .. }
            | Self::PolicyNoFit { .. } => EventSeverity::Warning,
            Self::EscalationRaised { severity, .. } => match severity {
                EscalationSeverity::Low | EscalationSeverity::Medium => EventSeverity::Warning,
                EscalationSeverity::High | EscalationSeverity::Critical => EventSeverity::Error,
                EscalationSeverity::SystemFailure => EventSeverity::Critical,
            },
            _ => EventSeverity::Info,
        }
    }

    /// Category carried into the envelope.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::OrchestratorStarted | Self::OrchestratorStopped => EventCategory::Orchestrator,
            Self::TaskSubmitted { .. }
            | Self::TaskReady { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskFailed { .. }
            | Self::TaskAbandoned { .. }
            | Self::TaskEscalatedToHuman { .. }
            | Self::TaskBlockedOnResources { .. }
            | Self::TaskDeadlinePassed { .. }
            | Self::TaskCancelRequested { .. } => EventCategory::Task,
            Self::TaskAssigned { .. } | Self::TaskReassigned { .. } => EventCategory::Assignment,
            Self::AgentRegistered { .. }
            | Self::AgentDeregistered { .. }
            | Self::AgentDrained { .. }
            | Self::AgentUnresponsive { .. }
            | Self::AgentRecovered { .. } => EventCategory::Agent,
            Self::ReservationGranted { .. } | Self::ReservationReleased { .. } => {
                EventCategory::Resource
            }
            Self::PolicyNoFit { .. } | Self::DispatchLost { .. } | Self::PolicyChanged { .. } => {
                EventCategory::Scheduler
            }
            Self::EscalationRaised { .. } => EventCategory::Escalation,
        }
    }
}

/// Event envelope with bus-assigned metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveEvent {
    pub id: EventId,
    /// Monotonically increasing, assigned by the bus at publish time
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub payload: EventPayload,
}

/// Central event bus broadcasting to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<HiveEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Create a bus with the given broadcast channel capacity.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish a payload. Never blocks; send errors (no subscribers) are
    /// ignored.
    pub fn emit(&self, payload: EventPayload) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = HiveEvent {
            id: EventId::new(),
            sequence: seq,
            timestamp: Utc::now(),
            severity: payload.severity(),
            category: payload.category(),
            payload,
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HiveEvent> {
        self.sender.subscribe()
    }

    /// The next sequence number to be assigned.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_assignment() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            let mut rx = bus.subscribe();

            bus.emit(EventPayload::OrchestratorStarted);
            bus.emit(EventPayload::OrchestratorStopped);

            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.sequence, 0);
            assert_eq!(second.sequence, 1);
            assert_eq!(bus.current_sequence(), 2);
        });
    }

    #[test]
    fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::default();
        bus.emit(EventPayload::OrchestratorStarted);
        assert_eq!(bus.current_sequence(), 1);
    }

    #[test]
    fn test_severity_derivation() {
        let payload = EventPayload::TaskEscalatedToHuman {
            task_id: Uuid::new_v4(),
        };
        assert_eq!(payload.severity(), EventSeverity::Critical);
        assert_eq!(payload.category(), EventCategory::Task);
    }
}
