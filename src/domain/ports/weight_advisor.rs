//! Weight advisor port (the ML hook).
//!
//! An external advisor may adjust the weighted scheduling policy at
//! runtime. It is modeled as a pure function from scheduling history to a
//! weight map; advice that is stale or invalid is ignored by the scheduler.

use std::collections::HashMap;

use async_trait::async_trait;

/// Aggregate per-agent scheduling history offered to the advisor.
#[derive(Debug, Clone, Default)]
pub struct SchedulingHistory {
    /// Dispatches per agent since boot
    pub dispatches: HashMap<String, u64>,
    /// Completions per agent since boot
    pub completions: HashMap<String, u64>,
    /// Reassignments away from each agent since boot
    pub reassignments: HashMap<String, u64>,
}

impl SchedulingHistory {
    pub fn record_dispatch(&mut self, agent_id: &str) {
        *self.dispatches.entry(agent_id.to_string()).or_default() += 1;
    }

    pub fn record_completion(&mut self, agent_id: &str) {
        *self.completions.entry(agent_id.to_string()).or_default() += 1;
    }

    pub fn record_reassignment(&mut self, agent_id: &str) {
        *self.reassignments.entry(agent_id.to_string()).or_default() += 1;
    }
}

#[async_trait]
pub trait WeightAdvisor: Send + Sync {
    /// Suggest per-agent weights. `None` means no advice this tick.
    async fn advise(&self, history: &SchedulingHistory) -> Option<HashMap<String, f64>>;
}
