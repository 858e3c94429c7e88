//! Progress report domain model.
//!
//! Reports are immutable once written. Invalid reports are stored with the
//! validity flag cleared; they never advance the assignment's view of
//! progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One progress report submitted by an agent for an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Unique identifier
    pub id: Uuid,
    /// Assignment this report belongs to
    pub assignment_id: Uuid,
    /// When the report was received
    pub timestamp: DateTime<Utc>,
    /// Claimed progress percentage, 0-100
    pub progress_pct: u8,
    /// One-line status summary
    pub summary: String,
    /// Opaque evidence references, resolved by the evidence resolver plugin
    pub evidence: Vec<String>,
    /// Reported blockers
    pub blockers: Vec<String>,
    /// Confidence level, 1-100
    pub confidence: u8,
    /// Set by the monitor after validation
    pub valid: bool,
}

impl ProgressReport {
    pub fn new(
        assignment_id: Uuid,
        progress_pct: u8,
        summary: impl Into<String>,
        evidence: Vec<String>,
        blockers: Vec<String>,
        confidence: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            timestamp: Utc::now(),
            progress_pct,
            summary: summary.into(),
            evidence,
            blockers,
            confidence,
            valid: false,
        }
    }
}
