//! Resource manager: admission control against finite compute budgets.
//!
//! Reservations are first-come-first-served with no queuing; the scheduler
//! retries a task on its next tick when a reservation fails. Counters live
//! in memory under a single lock and are rebuilt from the durable ledger at
//! boot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{Dimension, LedgerEntry, ResourceSpec};
use crate::domain::ports::LedgerRepository;
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::retry::RetryPolicy;

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Every requested dimension was reserved
    Reserved(Uuid),
    /// At least one dimension would exceed its cap; nothing was reserved
    Insufficient,
}

/// Point-in-time ledger totals, used by the scheduler to prefilter
/// candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub limits: ResourceSpec,
    pub reserved: ResourceSpec,
    pub live_reservations: usize,
}

impl ResourceSnapshot {
    /// Capacity still unreserved, per dimension.
    pub fn headroom(&self) -> ResourceSpec {
        self.limits.minus(&self.reserved)
    }
}

/// Read-only advisory output of the resource manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationHint {
    pub overcommitted: Vec<Dimension>,
    pub undercommitted: Vec<Dimension>,
}

/// Utilization above this fraction marks a dimension overcommitted.
const OVERCOMMIT_THRESHOLD: f64 = 0.85;
/// Utilization below this fraction marks a dimension undercommitted.
const UNDERCOMMIT_THRESHOLD: f64 = 0.25;

struct Counters {
    reserved: ResourceSpec,
    entries: HashMap<Uuid, LedgerEntry>,
}

/// Admission controller over the four resource dimensions.
pub struct ResourceManager {
    limits: ResourceSpec,
    counters: Mutex<Counters>,
    ledger: Arc<dyn LedgerRepository>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl ResourceManager {
    pub fn new(
        limits: ResourceSpec,
        ledger: Arc<dyn LedgerRepository>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            limits,
            counters: Mutex::new(Counters {
                reserved: ResourceSpec::zero(),
                entries: HashMap::new(),
            }),
            ledger,
            events,
            retry: RetryPolicy::default(),
        }
    }

    /// System-wide per-dimension caps.
    pub fn limits(&self) -> ResourceSpec {
        self.limits
    }

    /// Rebuild in-memory counters from the durable ledger. Called once at
    /// boot, before the loops start.
    pub async fn rebuild_from_ledger(&self) -> DomainResult<usize> {
        let entries = self.ledger.list_all().await?;
        let mut counters = self.counters.lock().await;
        counters.reserved = ResourceSpec::zero();
        counters.entries.clear();
        for entry in entries {
            counters.reserved = counters.reserved.plus(&entry.reserved);
            counters.entries.insert(entry.allocation_id, entry);
        }
        Ok(counters.entries.len())
    }

    /// Atomically reserve all four dimensions for an agent.
    ///
    /// Returns `Insufficient` without reserving anything if any dimension
    /// would exceed its cap. If the durable ledger write fails after the
    /// counters were incremented, the counters are reverted before the
    /// error is returned.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn reserve(
        &self,
        agent_id: &str,
        task_id: Option<Uuid>,
        requirements: ResourceSpec,
    ) -> DomainResult<ReserveOutcome> {
        let entry = LedgerEntry::new(agent_id, task_id, requirements);
        let allocation_id = entry.allocation_id;

        {
            let mut counters = self.counters.lock().await;
            let proposed = counters.reserved.plus(&requirements);
            if !proposed.fits_within(&self.limits) {
                debug!(
                    agent_id,
                    ?requirements,
                    reserved = ?counters.reserved,
                    limits = ?self.limits,
                    "Reservation rejected: insufficient capacity"
                );
                return Ok(ReserveOutcome::Insufficient);
            }
            counters.reserved = proposed;
            counters.entries.insert(allocation_id, entry.clone());
        }

        // Durable write outside the lock; revert counters on failure.
        let ledger = Arc::clone(&self.ledger);
        let write = self
            .retry
            .run("ledger_insert", || {
                let ledger = Arc::clone(&ledger);
                let entry = entry.clone();
                async move { ledger.insert(&entry).await }
            })
            .await;

        if let Err(err) = write {
            warn!(agent_id, error = %err, "Ledger write failed, reverting reservation counters");
            let mut counters = self.counters.lock().await;
            if counters.entries.remove(&allocation_id).is_some() {
                counters.reserved = counters.reserved.minus(&requirements);
            }
            return Err(err);
        }

        self.events.emit(EventPayload::ReservationGranted {
            allocation_id,
            agent_id: agent_id.to_string(),
        });
        Ok(ReserveOutcome::Reserved(allocation_id))
    }

    /// Release a reservation. Idempotent: releasing an unknown or already
    /// released allocation is a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self, allocation_id: Uuid) -> DomainResult<bool> {
        // Durable delete first so a crash between the two steps leaves the
        // entry visible to the boot-time rebuild rather than leaked.
        let ledger = Arc::clone(&self.ledger);
        self.retry
            .run("ledger_delete", || {
                let ledger = Arc::clone(&ledger);
                async move { ledger.delete(allocation_id).await }
            })
            .await?;

        let released = {
            let mut counters = self.counters.lock().await;
            match counters.entries.remove(&allocation_id) {
                Some(entry) => {
                    counters.reserved = counters.reserved.minus(&entry.reserved);
                    true
                }
                None => false,
            }
        };

        if released {
            self.events
                .emit(EventPayload::ReservationReleased { allocation_id });
        }
        Ok(released)
    }

    /// Point-in-time totals.
    pub async fn snapshot(&self) -> ResourceSnapshot {
        let counters = self.counters.lock().await;
        ResourceSnapshot {
            limits: self.limits,
            reserved: counters.reserved,
            live_reservations: counters.entries.len(),
        }
    }

    /// Read-only advisory: which dimensions run hot or cold.
    pub async fn optimization_hint(&self) -> OptimizationHint {
        let snapshot = self.snapshot().await;
        let mut hint = OptimizationHint::default();
        for dim in Dimension::ALL {
            let cap = snapshot.limits.dimension(dim);
            if cap == 0 {
                continue;
            }
            let used = snapshot.reserved.dimension(dim) as f64 / cap as f64;
            if used >= OVERCOMMIT_THRESHOLD {
                hint.overcommitted.push(dim);
            } else if used < UNDERCOMMIT_THRESHOLD {
                hint.undercommitted.push(dim);
            }
        }
        hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    /// In-memory ledger stub; can be switched to fail writes.
    #[derive(Default)]
    struct StubLedger {
        entries: AsyncMutex<Vec<LedgerEntry>>,
        fail_inserts: AtomicBool,
    }

    #[async_trait]
    impl crate::domain::ports::LedgerRepository for StubLedger {
        async fn insert(&self, entry: &LedgerEntry) -> crate::domain::DomainResult<()> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(crate::domain::DomainError::DatabaseError(
                    "stub write failure".to_string(),
                ));
            }
            self.entries.lock().await.push(entry.clone());
            Ok(())
        }

        async fn delete(&self, allocation_id: Uuid) -> crate::domain::DomainResult<bool> {
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|e| e.allocation_id != allocation_id);
            Ok(entries.len() < before)
        }

        async fn list_all(&self) -> crate::domain::DomainResult<Vec<LedgerEntry>> {
            Ok(self.entries.lock().await.clone())
        }
    }

    fn manager(limits: ResourceSpec) -> (ResourceManager, Arc<StubLedger>) {
        let ledger = Arc::new(StubLedger::default());
        let port: Arc<dyn crate::domain::ports::LedgerRepository> = ledger.clone();
        let events = Arc::new(EventBus::default());
        (ResourceManager::new(limits, port, events), ledger)
    }

    #[tokio::test]
    async fn test_reserve_all_or_nothing() {
        let (manager, _) = manager(ResourceSpec::new(4, 1024, 100, 100));

        // Memory alone exceeds the cap; nothing is reserved.
        let outcome = manager
            .reserve("agent-a", None, ResourceSpec::new(1, 2048, 0, 0))
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::Insufficient);
        assert!(manager.snapshot().await.reserved.is_zero());

        let outcome = manager
            .reserve("agent-a", None, ResourceSpec::new(2, 512, 0, 0))
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Reserved(_)));
        assert_eq!(manager.snapshot().await.reserved.cpu_cores, 2);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (manager, _) = manager(ResourceSpec::new(4, 1024, 100, 100));
        let ReserveOutcome::Reserved(id) = manager
            .reserve("agent-a", None, ResourceSpec::new(1, 256, 0, 0))
            .await
            .unwrap()
        else {
            panic!("reservation must succeed");
        };

        assert!(manager.release(id).await.unwrap());
        assert!(!manager.release(id).await.unwrap());
        assert!(!manager.release(Uuid::new_v4()).await.unwrap());
        assert!(manager.snapshot().await.reserved.is_zero());
    }

    #[tokio::test]
    async fn test_failed_durable_write_reverts_counters() {
        let (manager, ledger) = manager(ResourceSpec::new(4, 1024, 100, 100));
        ledger.fail_inserts.store(true, Ordering::SeqCst);

        let result = manager
            .reserve("agent-a", None, ResourceSpec::new(1, 256, 0, 0))
            .await;
        assert!(result.is_err());
        let snapshot = manager.snapshot().await;
        assert!(snapshot.reserved.is_zero());
        assert_eq!(snapshot.live_reservations, 0);
    }

    #[tokio::test]
    async fn test_rebuild_from_ledger() {
        let (manager, ledger) = manager(ResourceSpec::new(8, 4096, 100, 100));
        ledger
            .entries
            .lock()
            .await
            .push(LedgerEntry::new("agent-a", None, ResourceSpec::new(2, 512, 0, 0)));
        ledger
            .entries
            .lock()
            .await
            .push(LedgerEntry::new("agent-b", None, ResourceSpec::new(1, 256, 0, 0)));

        assert_eq!(manager.rebuild_from_ledger().await.unwrap(), 2);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.reserved.cpu_cores, 3);
        assert_eq!(snapshot.reserved.memory_mb, 768);
    }

    #[tokio::test]
    async fn test_optimization_hint_thresholds() {
        let (manager, _) = manager(ResourceSpec::new(10, 1000, 1000, 1000));
        manager
            .reserve("agent-a", None, ResourceSpec::new(9, 100, 0, 0))
            .await
            .unwrap();

        let hint = manager.optimization_hint().await;
        assert!(hint.overcommitted.contains(&Dimension::Cpu));
        assert!(hint.undercommitted.contains(&Dimension::Disk));
        assert!(!hint.overcommitted.contains(&Dimension::Memory));
    }
}
