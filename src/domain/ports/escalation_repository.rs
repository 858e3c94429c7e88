//! Escalation repository port.
//!
//! The `escalations` collection.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::Escalation;

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    /// Append an escalation record.
    async fn insert(&self, escalation: &Escalation) -> DomainResult<()>;

    /// Get an escalation by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Escalation>>;

    /// Replace an existing record (resolution).
    async fn update(&self, escalation: &Escalation) -> DomainResult<()>;

    /// Escalations not yet resolved, newest first.
    async fn list_unresolved(&self) -> DomainResult<Vec<Escalation>>;

    /// Every escalation, newest first.
    async fn list_all(&self) -> DomainResult<Vec<Escalation>>;

    /// Every escalation for one task, oldest first.
    async fn list_by_task(&self, task_id: Uuid) -> DomainResult<Vec<Escalation>>;
}
