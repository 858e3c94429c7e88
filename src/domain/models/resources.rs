//! Resource accounting primitives.
//!
//! The core budgets four dimensions of compute. Reservations are
//! all-or-nothing across dimensions; the ledger is the durable record of
//! every live reservation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A four-dimensional quantity of compute resources.
///
/// Used both for system-wide caps, per-agent footprints, and per-task
/// requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU cores
    pub cpu_cores: u32,
    /// Memory in megabytes
    pub memory_mb: u64,
    /// Disk in megabytes
    pub disk_mb: u64,
    /// Network bandwidth in megabits per second
    pub network_mbps: u64,
}

impl ResourceSpec {
    pub fn new(cpu_cores: u32, memory_mb: u64, disk_mb: u64, network_mbps: u64) -> Self {
        Self {
            cpu_cores,
            memory_mb,
            disk_mb,
            network_mbps,
        }
    }

    /// The zero quantity.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Whether every dimension of `self` fits within `other`.
    pub fn fits_within(&self, other: &Self) -> bool {
        self.cpu_cores <= other.cpu_cores
            && self.memory_mb <= other.memory_mb
            && self.disk_mb <= other.disk_mb
            && self.network_mbps <= other.network_mbps
    }

    /// Component-wise sum.
    pub fn plus(&self, other: &Self) -> Self {
        Self {
            cpu_cores: self.cpu_cores + other.cpu_cores,
            memory_mb: self.memory_mb + other.memory_mb,
            disk_mb: self.disk_mb + other.disk_mb,
            network_mbps: self.network_mbps + other.network_mbps,
        }
    }

    /// Component-wise difference, saturating at zero.
    pub fn minus(&self, other: &Self) -> Self {
        Self {
            cpu_cores: self.cpu_cores.saturating_sub(other.cpu_cores),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_mb: self.disk_mb.saturating_sub(other.disk_mb),
            network_mbps: self.network_mbps.saturating_sub(other.network_mbps),
        }
    }

    /// Dimension value as a plain number, for ratio computations.
    pub fn dimension(&self, dim: Dimension) -> u64 {
        match dim {
            Dimension::Cpu => u64::from(self.cpu_cores),
            Dimension::Memory => self.memory_mb,
            Dimension::Disk => self.disk_mb,
            Dimension::Network => self.network_mbps,
        }
    }
}

/// One of the four budgeted resource dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Cpu,
        Dimension::Memory,
        Dimension::Disk,
        Dimension::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of a live reservation for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique allocation identifier, used for idempotent release
    pub allocation_id: Uuid,
    /// Agent the reservation belongs to
    pub agent_id: String,
    /// Task the reservation was made for, when known
    pub task_id: Option<Uuid>,
    /// Reserved quantities
    pub reserved: ResourceSpec,
    /// When the reservation was made
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(agent_id: impl Into<String>, task_id: Option<Uuid>, reserved: ResourceSpec) -> Self {
        Self {
            allocation_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            task_id,
            reserved,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_within() {
        let small = ResourceSpec::new(1, 256, 0, 0);
        let big = ResourceSpec::new(4, 1024, 100, 100);
        assert!(small.fits_within(&big));
        assert!(!big.fits_within(&small));
        // Equal fits
        assert!(big.fits_within(&big));
    }

    #[test]
    fn test_fits_within_single_dimension_overflow() {
        let req = ResourceSpec::new(1, 2048, 0, 0);
        let cap = ResourceSpec::new(8, 1024, 1000, 1000);
        // Memory alone exceeding the cap fails the whole fit
        assert!(!req.fits_within(&cap));
    }

    #[test]
    fn test_plus_minus_round_trip() {
        let a = ResourceSpec::new(2, 512, 10, 5);
        let b = ResourceSpec::new(1, 256, 5, 5);
        assert_eq!(a.plus(&b).minus(&b), a);
    }

    #[test]
    fn test_minus_saturates() {
        let a = ResourceSpec::new(1, 100, 0, 0);
        let b = ResourceSpec::new(2, 500, 1, 1);
        assert_eq!(a.minus(&b), ResourceSpec::zero());
    }
}
