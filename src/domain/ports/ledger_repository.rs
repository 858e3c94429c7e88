//! Resource ledger repository port.
//!
//! Durable record of live reservations; the in-memory counters of the
//! resource manager are rebuilt from this at boot.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::LedgerEntry;

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Persist a reservation.
    async fn insert(&self, entry: &LedgerEntry) -> DomainResult<()>;

    /// Remove a reservation. Returns false when it was already gone, which
    /// keeps release idempotent.
    async fn delete(&self, allocation_id: Uuid) -> DomainResult<bool>;

    /// Every live reservation.
    async fn list_all(&self) -> DomainResult<Vec<LedgerEntry>>;
}
