//! Agent domain model.
//!
//! Agents are long-lived external worker processes. The core knows them
//! only through their registered descriptor: a capability set, a role, a
//! concurrency capacity, and a resource footprint. Health is derived from
//! heartbeat age.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::resources::ResourceSpec;
use super::task::Capability;

/// Coarse role classification of an agent.
///
/// The role is informational; scheduling matches on the capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Build,
    Review,
    Doc,
    Research,
    Ops,
}

impl Default for AgentRole {
    fn default() -> Self {
        Self::Build
    }
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Review => "review",
            Self::Doc => "doc",
            Self::Research => "research",
            Self::Ops => "ops",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "build" => Some(Self::Build),
            "review" => Some(Self::Review),
            "doc" => Some(Self::Doc),
            "research" => Some(Self::Research),
            "ops" => Some(Self::Ops),
            _ => None,
        }
    }
}

/// Derived health of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Heartbeating within the expected interval
    Healthy,
    /// Heartbeat late but within the response timeout
    Suspect,
    /// Heartbeat silence past the response timeout; active work is reassigned
    Unresponsive,
    /// Explicitly taken out of rotation; finishes existing work only
    Drained,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self::Healthy
    }
}

impl AgentHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Suspect => "suspect",
            Self::Unresponsive => "unresponsive",
            Self::Drained => "drained",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "suspect" => Some(Self::Suspect),
            "unresponsive" => Some(Self::Unresponsive),
            "drained" => Some(Self::Drained),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registered descriptor of a live agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Caller-chosen unique identifier; duplicates are rejected at
    /// registration
    pub id: String,
    /// Role classification
    pub role: AgentRole,
    /// Capability labels matched against task kinds by set containment
    pub capabilities: BTreeSet<Capability>,
    /// Advertised concurrent capacity
    pub capacity: u32,
    /// Count of active assignments; never exceeds capacity
    pub current_load: u32,
    /// Resource footprint used for admission control
    pub footprint: ResourceSpec,
    /// Last heartbeat received
    pub last_heartbeat_at: DateTime<Utc>,
    /// Derived health
    pub health: AgentHealth,
    /// Scheduling weight for the weighted policy
    pub weight: f64,
    /// When registered
    pub registered_at: DateTime<Utc>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, role: AgentRole, capacity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role,
            capabilities: BTreeSet::new(),
            capacity,
            current_load: 0,
            footprint: ResourceSpec::zero(),
            last_heartbeat_at: now,
            health: AgentHealth::Healthy,
            weight: 1.0,
            registered_at: now,
        }
    }

    /// Add a capability label.
    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Set the resource footprint.
    pub fn with_footprint(mut self, footprint: ResourceSpec) -> Self {
        self.footprint = footprint;
        self
    }

    /// Spare concurrent slots.
    pub fn free_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.current_load)
    }

    /// Whether this agent can be offered a task of the given kind right now.
    pub fn can_accept(&self, kind: &Capability) -> bool {
        self.health == AgentHealth::Healthy
            && self.free_capacity() > 0
            && self.capabilities.contains(kind)
    }

    /// Derive health from heartbeat age.
    ///
    /// Drained is sticky: it is set explicitly and never recomputed away.
    pub fn derive_health(
        &self,
        now: DateTime<Utc>,
        heartbeat_interval: Duration,
        response_timeout: Duration,
    ) -> AgentHealth {
        if self.health == AgentHealth::Drained {
            return AgentHealth::Drained;
        }
        let age = now - self.last_heartbeat_at;
        if age <= heartbeat_interval {
            AgentHealth::Healthy
        } else if age <= response_timeout {
            AgentHealth::Suspect
        } else {
            AgentHealth::Unresponsive
        }
    }

    /// Validate registration-level constraints.
    pub fn validate(&self) -> Result<(), crate::domain::DomainError> {
        if self.id.trim().is_empty() {
            return Err(crate::domain::DomainError::ValidationFailed(
                "agent id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentDescriptor {
        AgentDescriptor::new("agent-a", AgentRole::Build, 2).with_capability("build")
    }

    #[test]
    fn test_can_accept_matches_capability() {
        let a = agent();
        assert!(a.can_accept(&Capability::from("build")));
        assert!(!a.can_accept(&Capability::from("review")));
    }

    #[test]
    fn test_zero_capacity_never_accepts() {
        let a = AgentDescriptor::new("a", AgentRole::Build, 0).with_capability("build");
        assert!(!a.can_accept(&Capability::from("build")));
    }

    #[test]
    fn test_full_load_never_accepts() {
        let mut a = agent();
        a.current_load = a.capacity;
        assert!(!a.can_accept(&Capability::from("build")));
    }

    #[test]
    fn test_health_derivation_thresholds() {
        let a = agent();
        let hb = Duration::seconds(30);
        let rt = Duration::seconds(300);
        let t0 = a.last_heartbeat_at;

        assert_eq!(a.derive_health(t0 + Duration::seconds(10), hb, rt), AgentHealth::Healthy);
        assert_eq!(a.derive_health(t0 + Duration::seconds(31), hb, rt), AgentHealth::Suspect);
        assert_eq!(
            a.derive_health(t0 + Duration::seconds(301), hb, rt),
            AgentHealth::Unresponsive
        );
    }

    #[test]
    fn test_drained_is_sticky() {
        let mut a = agent();
        a.health = AgentHealth::Drained;
        let hb = Duration::seconds(30);
        let rt = Duration::seconds(300);
        assert_eq!(
            a.derive_health(a.last_heartbeat_at, hb, rt),
            AgentHealth::Drained
        );
    }
}
