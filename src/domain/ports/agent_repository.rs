//! Agent repository port.
//!
//! The `agents` collection. Descriptors survive unresponsiveness so work
//! held by a dead agent can be reassigned; rows disappear only on
//! deregistration.

use async_trait::async_trait;

use crate::domain::error::DomainResult;
use crate::domain::models::AgentDescriptor;

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert a descriptor if the id is free. Returns false when the id is
    /// already taken.
    async fn try_insert(&self, agent: &AgentDescriptor) -> DomainResult<bool>;

    /// Get a descriptor by id.
    async fn get(&self, id: &str) -> DomainResult<Option<AgentDescriptor>>;

    /// Replace an existing descriptor.
    async fn update(&self, agent: &AgentDescriptor) -> DomainResult<()>;

    /// Remove a descriptor.
    async fn delete(&self, id: &str) -> DomainResult<()>;

    /// Every registered descriptor.
    async fn list_all(&self) -> DomainResult<Vec<AgentDescriptor>>;
}
