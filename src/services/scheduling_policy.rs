//! Pluggable scheduling policies.
//!
//! For each candidate (task, agent) pair a policy returns a fit score in
//! [0, 1] plus a binary acceptability flag. The coordinator dispatches only
//! acceptable pairs; unacceptable ones become no-fit events. Policies may
//! also reorder the agent iteration of a tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::models::{AgentDescriptor, PolicyKind, Task};
use crate::services::resource_manager::ResourceSnapshot;

/// Fit-score contract output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitScore {
    /// Real in [0, 1]
    pub score: f64,
    /// Whether the coordinator may dispatch this pair
    pub acceptable: bool,
}

impl FitScore {
    pub fn reject() -> Self {
        Self {
            score: 0.0,
            acceptable: false,
        }
    }

    pub fn accept(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            acceptable: true,
        }
    }
}

/// Per-tick context shared with the policy.
pub struct PolicyContext<'a> {
    /// Resource ledger totals at the start of the tick
    pub snapshot: &'a ResourceSnapshot,
    /// Normalized weights for the weighted policy; empty when no valid
    /// weights exist this tick
    pub weights: &'a HashMap<String, f64>,
}

/// A scheduling policy. Exactly one is configured at a time.
pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Order the agents for this tick. Defaults to highest free capacity
    /// first.
    fn order_agents(&self, agents: &mut [AgentDescriptor], _ctx: &PolicyContext<'_>) {
        agents.sort_by(|a, b| b.free_capacity().cmp(&a.free_capacity()));
    }

    /// Score one candidate pair.
    fn fit(&self, task: &Task, agent: &AgentDescriptor, ctx: &PolicyContext<'_>) -> FitScore;
}

/// Shared gate: an unacceptable pair regardless of policy.
fn basic_gate(task: &Task, agent: &AgentDescriptor) -> bool {
    agent.can_accept(&task.kind)
}

/// Round-robin: next agent in a rotation. Ignores current load; intended
/// for homogeneous agents.
pub struct RoundRobinPolicy {
    cursor: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn order_agents(&self, agents: &mut [AgentDescriptor], _ctx: &PolicyContext<'_>) {
        // Stable id order, rotated by the tick cursor.
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        if !agents.is_empty() {
            let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % agents.len();
            agents.rotate_left(offset);
        }
    }

    fn fit(&self, task: &Task, agent: &AgentDescriptor, _ctx: &PolicyContext<'_>) -> FitScore {
        if basic_gate(task, agent) {
            FitScore::accept(1.0)
        } else {
            FitScore::reject()
        }
    }
}

/// Least-connections: fewest current active assignments first.
pub struct LeastConnectionsPolicy;

impl SchedulingPolicy for LeastConnectionsPolicy {
    fn name(&self) -> &'static str {
        "least-connections"
    }

    fn order_agents(&self, agents: &mut [AgentDescriptor], _ctx: &PolicyContext<'_>) {
        agents.sort_by(|a, b| {
            a.current_load
                .cmp(&b.current_load)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    fn fit(&self, task: &Task, agent: &AgentDescriptor, _ctx: &PolicyContext<'_>) -> FitScore {
        if !basic_gate(task, agent) {
            return FitScore::reject();
        }
        let load_ratio = if agent.capacity == 0 {
            1.0
        } else {
            f64::from(agent.current_load) / f64::from(agent.capacity)
        };
        FitScore::accept(1.0 - load_ratio)
    }
}

/// Resource-based: prefers pairs where the task's requirement is the
/// tightest fit into the remaining headroom, minimizing fragmentation.
pub struct ResourceBasedPolicy;

impl SchedulingPolicy for ResourceBasedPolicy {
    fn name(&self) -> &'static str {
        "resource-based"
    }

    fn fit(&self, task: &Task, agent: &AgentDescriptor, ctx: &PolicyContext<'_>) -> FitScore {
        if !basic_gate(task, agent) {
            return FitScore::reject();
        }
        let headroom = ctx.snapshot.headroom();
        if !task.resources.fits_within(&headroom) {
            return FitScore::reject();
        }
        // Tightest fit scores highest: the mean utilization the requirement
        // would take out of the remaining headroom.
        let mut ratios = Vec::with_capacity(4);
        for dim in crate::domain::models::Dimension::ALL {
            let free = headroom.dimension(dim);
            if free > 0 {
                ratios.push(task.resources.dimension(dim) as f64 / free as f64);
            }
        }
        if ratios.is_empty() {
            return FitScore::accept(0.5);
        }
        let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
        FitScore::accept(mean)
    }
}

/// Capability-first: agents whose capability set is the tightest superset
/// of the task kind; ties broken by least connections.
pub struct CapabilityFirstPolicy;

impl CapabilityFirstPolicy {
    fn score(agent: &AgentDescriptor) -> f64 {
        // Fewer capabilities means a tighter superset.
        let tightness = 1.0 / agent.capabilities.len().max(1) as f64;
        let load_ratio = if agent.capacity == 0 {
            1.0
        } else {
            f64::from(agent.current_load) / f64::from(agent.capacity)
        };
        0.7 * tightness + 0.3 * (1.0 - load_ratio)
    }
}

impl SchedulingPolicy for CapabilityFirstPolicy {
    fn name(&self) -> &'static str {
        "capability-first"
    }

    fn order_agents(&self, agents: &mut [AgentDescriptor], _ctx: &PolicyContext<'_>) {
        agents.sort_by(|a, b| {
            a.capabilities
                .len()
                .cmp(&b.capabilities.len())
                .then_with(|| a.current_load.cmp(&b.current_load))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    fn fit(&self, task: &Task, agent: &AgentDescriptor, _ctx: &PolicyContext<'_>) -> FitScore {
        if !basic_gate(task, agent) {
            return FitScore::reject();
        }
        FitScore::accept(Self::score(agent))
    }
}

/// Weighted: operator-assigned weights, normalized over the candidates.
/// Invalid or missing weights fall back to capability-first scoring.
pub struct WeightedPolicy {
    fallback: CapabilityFirstPolicy,
}

impl WeightedPolicy {
    pub fn new() -> Self {
        Self {
            fallback: CapabilityFirstPolicy,
        }
    }
}

impl Default for WeightedPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingPolicy for WeightedPolicy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn order_agents(&self, agents: &mut [AgentDescriptor], ctx: &PolicyContext<'_>) {
        if ctx.weights.is_empty() {
            self.fallback.order_agents(agents, ctx);
            return;
        }
        agents.sort_by(|a, b| {
            let wa = ctx.weights.get(&a.id).copied().unwrap_or(0.0);
            let wb = ctx.weights.get(&b.id).copied().unwrap_or(0.0);
            wb.partial_cmp(&wa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    fn fit(&self, task: &Task, agent: &AgentDescriptor, ctx: &PolicyContext<'_>) -> FitScore {
        if !basic_gate(task, agent) {
            return FitScore::reject();
        }
        match ctx.weights.get(&agent.id) {
            Some(weight) => FitScore::accept(*weight),
            None => self.fallback.fit(task, agent, ctx),
        }
    }
}

/// Construct the configured policy.
pub fn build_policy(kind: PolicyKind) -> Box<dyn SchedulingPolicy> {
    match kind {
        PolicyKind::RoundRobin => Box::new(RoundRobinPolicy::new()),
        PolicyKind::LeastConnections => Box::new(LeastConnectionsPolicy),
        PolicyKind::ResourceBased => Box::new(ResourceBasedPolicy),
        PolicyKind::CapabilityFirst => Box::new(CapabilityFirstPolicy),
        PolicyKind::Weighted => Box::new(WeightedPolicy::new()),
    }
}

/// Normalize a raw weight map over the live agents.
///
/// Returns an empty map when the advice is unusable (non-finite,
/// non-positive, or referencing no live agent), which makes the weighted
/// policy fall back to capability-first for the tick.
pub fn normalize_weights(
    raw: &HashMap<String, f64>,
    agents: &[AgentDescriptor],
) -> HashMap<String, f64> {
    let mut filtered: HashMap<String, f64> = HashMap::new();
    for agent in agents {
        if let Some(w) = raw.get(&agent.id) {
            if !w.is_finite() || *w <= 0.0 {
                return HashMap::new();
            }
            filtered.insert(agent.id.clone(), *w);
        }
    }
    let total: f64 = filtered.values().sum();
    if filtered.is_empty() || total <= 0.0 {
        return HashMap::new();
    }
    filtered.values_mut().for_each(|w| *w /= total);
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentRole, ResourceSpec};

    fn agent(id: &str, caps: &[&str], capacity: u32, load: u32) -> AgentDescriptor {
        let mut a = AgentDescriptor::new(id, AgentRole::Build, capacity);
        for c in caps {
            a = a.with_capability(*c);
        }
        a.current_load = load;
        a
    }

    fn snapshot() -> ResourceSnapshot {
        ResourceSnapshot {
            limits: ResourceSpec::new(8, 8192, 1000, 1000),
            reserved: ResourceSpec::zero(),
            live_reservations: 0,
        }
    }

    fn ctx<'a>(
        snapshot: &'a ResourceSnapshot,
        weights: &'a HashMap<String, f64>,
    ) -> PolicyContext<'a> {
        PolicyContext { snapshot, weights }
    }

    #[test]
    fn test_capability_mismatch_rejected_by_every_policy() {
        let task = Task::new("t", "d", "review");
        let a = agent("a", &["build"], 1, 0);
        let snap = snapshot();
        let weights = HashMap::new();
        let c = ctx(&snap, &weights);

        for policy in [
            build_policy(PolicyKind::RoundRobin),
            build_policy(PolicyKind::LeastConnections),
            build_policy(PolicyKind::ResourceBased),
            build_policy(PolicyKind::CapabilityFirst),
            build_policy(PolicyKind::Weighted),
        ] {
            assert!(!policy.fit(&task, &a, &c).acceptable, "{}", policy.name());
        }
    }

    #[test]
    fn test_capability_first_prefers_tightest_superset() {
        let task = Task::new("t", "d", "build");
        let specialist = agent("spec", &["build"], 2, 0);
        let generalist = agent("gen", &["build", "review", "doc"], 2, 0);
        let snap = snapshot();
        let weights = HashMap::new();
        let c = ctx(&snap, &weights);
        let policy = CapabilityFirstPolicy;

        let s1 = policy.fit(&task, &specialist, &c);
        let s2 = policy.fit(&task, &generalist, &c);
        assert!(s1.score > s2.score);
    }

    #[test]
    fn test_least_connections_ordering() {
        let busy = agent("busy", &["build"], 4, 3);
        let idle = agent("idle", &["build"], 4, 0);
        let mut agents = vec![busy, idle];
        let snap = snapshot();
        let weights = HashMap::new();
        LeastConnectionsPolicy.order_agents(&mut agents, &ctx(&snap, &weights));
        assert_eq!(agents[0].id, "idle");
    }

    #[test]
    fn test_round_robin_rotates() {
        let policy = RoundRobinPolicy::new();
        let snap = snapshot();
        let weights = HashMap::new();
        let c = ctx(&snap, &weights);

        let mut agents = vec![
            agent("a", &["build"], 1, 0),
            agent("b", &["build"], 1, 0),
            agent("c", &["build"], 1, 0),
        ];
        policy.order_agents(&mut agents, &c);
        let first_tick = agents[0].id.clone();
        policy.order_agents(&mut agents, &c);
        assert_ne!(agents[0].id, first_tick);
    }

    #[test]
    fn test_resource_based_rejects_over_headroom() {
        let task = Task::new("t", "d", "build").with_resources(ResourceSpec::new(16, 0, 0, 0));
        let a = agent("a", &["build"], 1, 0);
        let snap = snapshot();
        let weights = HashMap::new();
        assert!(!ResourceBasedPolicy.fit(&task, &a, &ctx(&snap, &weights)).acceptable);
    }

    #[test]
    fn test_normalize_weights_rejects_invalid() {
        let agents = vec![agent("a", &["build"], 1, 0), agent("b", &["build"], 1, 0)];
        let bad: HashMap<String, f64> = [("a".to_string(), -1.0)].into_iter().collect();
        assert!(normalize_weights(&bad, &agents).is_empty());

        let nan: HashMap<String, f64> = [("a".to_string(), f64::NAN)].into_iter().collect();
        assert!(normalize_weights(&nan, &agents).is_empty());

        let stale: HashMap<String, f64> = [("ghost".to_string(), 1.0)].into_iter().collect();
        assert!(normalize_weights(&stale, &agents).is_empty());
    }

    #[test]
    fn test_normalize_weights_sums_to_one() {
        let agents = vec![agent("a", &["build"], 1, 0), agent("b", &["build"], 1, 0)];
        let raw: HashMap<String, f64> =
            [("a".to_string(), 3.0), ("b".to_string(), 1.0)].into_iter().collect();
        let normalized = normalize_weights(&raw, &agents);
        let total: f64 = normalized.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((normalized["a"] - 0.75).abs() < 1e-9);
    }
}
