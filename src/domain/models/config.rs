//! Configuration model.
//!
//! Loaded once at boot and immutable afterwards; runtime policy changes go
//! through the operator surface and are persisted, never through this
//! object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::resources::ResourceSpec;

/// Which scheduling policy the coordinator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    RoundRobin,
    LeastConnections,
    ResourceBased,
    CapabilityFirst,
    Weighted,
}

impl Default for PolicyKind {
    fn default() -> Self {
        Self::CapabilityFirst
    }
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::LeastConnections => "least-connections",
            Self::ResourceBased => "resource-based",
            Self::CapabilityFirst => "capability-first",
            Self::Weighted => "weighted",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "round-robin" | "round_robin" => Some(Self::RoundRobin),
            "least-connections" | "least_connections" => Some(Self::LeastConnections),
            "resource-based" | "resource_based" => Some(Self::ResourceBased),
            "capability-first" | "capability_first" => Some(Self::CapabilityFirst),
            "weighted" => Some(Self::Weighted),
            _ => None,
        }
    }
}

/// Orchestration-core options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Monitor tick period, seconds
    pub check_interval_seconds: u64,
    /// Scheduler tick period, seconds
    pub scheduling_interval_seconds: u64,
    /// Horizon within which an upcoming deadline promotes a task in the
    /// queue ordering, seconds
    pub scheduling_horizon_seconds: u64,
    /// Expected agent heartbeat cadence, seconds
    pub heartbeat_interval_seconds: u64,
    /// Max quiet period per assignment before a stall escalation, minutes
    pub progress_timeout_minutes: u64,
    /// Heartbeat silence that marks an agent unresponsive, minutes
    pub response_timeout_minutes: u64,
    /// Dispatch acknowledgement window, seconds
    pub assignment_ack_timeout_seconds: u64,
    /// Deadline leniency applied to the execution estimate
    pub completion_timeout_multiplier: f64,
    /// Reassignments allowed before forcing escalation to a human
    pub max_reassignments: u32,
    /// When false, evidence checks are skipped (discouraged)
    pub evidence_validation_required: bool,
    /// When false, escalations are recorded but no automated reassignment
    /// happens
    pub auto_escalation_enabled: bool,
    /// Scheduling policy
    pub scheduling_policy: PolicyKind,
    /// System-wide per-dimension resource caps
    pub resource_limits: ResourceSpec,
    /// Soft cap on live (non-terminal) tasks
    pub queue_soft_cap: u64,
    /// Bound on cooperative cancellation before it is forced, seconds
    pub cancel_grace_seconds: u64,
    /// Whether a prerequisite's terminal failure fails its dependents
    pub upstream_failure_cascade: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            scheduling_interval_seconds: 5,
            scheduling_horizon_seconds: 300,
            heartbeat_interval_seconds: 30,
            progress_timeout_minutes: 30,
            response_timeout_minutes: 5,
            assignment_ack_timeout_seconds: 15,
            completion_timeout_multiplier: 1.5,
            max_reassignments: 2,
            evidence_validation_required: true,
            auto_escalation_enabled: true,
            scheduling_policy: PolicyKind::default(),
            resource_limits: ResourceSpec::new(64, 65_536, 1_048_576, 10_000),
            queue_soft_cap: 10_000,
            cancel_grace_seconds: 60,
            upstream_failure_cascade: true,
        }
    }
}

impl CoreConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn scheduling_interval(&self) -> Duration {
        Duration::from_secs(self.scheduling_interval_seconds)
    }

    pub fn scheduling_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.scheduling_horizon_seconds as i64)
    }

    pub fn heartbeat_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_interval_seconds as i64)
    }

    pub fn progress_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.progress_timeout_minutes as i64)
    }

    pub fn response_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.response_timeout_minutes as i64)
    }

    pub fn ack_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.assignment_ack_timeout_seconds as i64)
    }

    pub fn cancel_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cancel_grace_seconds as i64)
    }
}

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: String,
    /// Connection pool upper bound
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".hive/hive.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// When set, logs also go to rolling files in this directory
    pub log_dir: Option<String>,
    /// daily | hourly | never
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
            rotation: "daily".to_string(),
        }
    }
}

/// Root configuration object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}
