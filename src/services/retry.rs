//! Bounded exponential backoff for transient store errors.
//!
//! Logical outcomes and validation failures are never retried; only errors
//! classified transient by the domain error type burn retry budget.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::domain::error::DomainResult;

/// Retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        multiplier: f64,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            multiplier,
            max_backoff,
        }
    }

    /// Run an operation, retrying transient failures with backoff.
    ///
    /// The closure is re-invoked for every attempt. After the budget is
    /// exhausted the last error is surfaced.
    pub async fn run<T, F, Fut>(&self, op_name: &str, operation: F) -> DomainResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let backoff = self.calculate_backoff(attempt);
                    warn!(
                        operation = op_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let backoff = self.initial_backoff.mul_f64(factor);
        backoff.min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DomainError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_calculate_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 2.0, Duration::from_millis(350));
        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(200));
        // 400ms capped to 350ms
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1.0, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result = policy
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DomainError::DatabaseError("blip".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: DomainResult<()> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DomainError::ValidationFailed("bad".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), 1.0, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: DomainResult<()> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DomainError::DatabaseError("down".to_string())) }
            })
            .await;
        assert!(matches!(result, Err(DomainError::DatabaseError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
