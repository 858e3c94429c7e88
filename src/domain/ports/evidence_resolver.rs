//! Evidence resolver port.
//!
//! Evidence references are opaque strings (file paths, artifact hashes,
//! commit ids). The core never inspects them; it asks a pluggable resolver
//! whether each reference resolves.

use async_trait::async_trait;

use crate::domain::error::DomainResult;

#[async_trait]
pub trait EvidenceResolver: Send + Sync {
    /// Whether the reference resolves to real evidence.
    async fn resolve(&self, reference: &str) -> DomainResult<bool>;
}

/// Null adapter: accepts every non-empty reference.
///
/// Used when no resolver is wired, and as the backing implementation when
/// `evidence_validation_required` is disabled.
pub struct AcceptAllResolver;

#[async_trait]
impl EvidenceResolver for AcceptAllResolver {
    async fn resolve(&self, reference: &str) -> DomainResult<bool> {
        Ok(!reference.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_rejects_empty() {
        let resolver = AcceptAllResolver;
        assert!(tokio_test::block_on(resolver.resolve("artifact-h1")).unwrap());
        assert!(!tokio_test::block_on(resolver.resolve("   ")).unwrap());
    }
}
