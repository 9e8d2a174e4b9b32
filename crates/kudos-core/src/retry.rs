// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry with exponential backoff for contended storage operations.
//!
//! Only [`CoreError::is_transient`] errors are retried. Each retried operation
//! must be a single atomic storage primitive so that a retry can never apply
//! the same increment twice.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CoreError, Result};

/// Retry behaviour for storage primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries after the first attempt.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the given retry (1-indexed): `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(multiplier)
    }

    /// Run `op`, retrying transient failures with backoff.
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-transient error immediately.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Storage contention, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(tag_operation(err, operation)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

/// Replace the generic `query` operation name from `From<sqlx::Error>`.
fn tag_operation(err: CoreError, operation: &str) -> CoreError {
    match err {
        CoreError::StorageContention { details, .. } => CoreError::StorageContention {
            operation: operation.to_string(),
            details,
        },
        CoreError::DatabaseError { details, .. } => CoreError::DatabaseError {
            operation: operation.to_string(),
            details,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn contention() -> CoreError {
        CoreError::StorageContention {
            operation: "query".to_string(),
            details: "database is locked".to_string(),
        }
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = policy
            .run("increment_progress", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(contention())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<()> = policy
            .run("insert_unlock", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(contention())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            CoreError::StorageContention { ref operation, .. } if operation == "insert_unlock"
        ));
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<()> = policy
            .run("get_profile", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::ProfileNotFound {
                        profile_id: "ghost".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(CoreError::ProfileNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
