//! Unified retry and backoff logic for Docvault storage adapters
//!
//! This crate provides consistent retry policies and backoff strategies
//! for every backup store the engine talks to. Errors decide for themselves
//! whether they are worth retrying through [`RetryableError`].

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(feature = "async-rt")]
use futures::Future;

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Exponential backoff settings, serializable so they can live in engine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval_ms: u64,
    /// Upper bound for a single delay
    pub max_interval_ms: u64,
    /// Total time budget across all attempts
    pub max_elapsed_ms: u64,
    /// Growth factor applied after every failed attempt
    pub multiplier: f64,
    /// Hard cap on attempts, including the first one
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            max_interval_ms: 5_000,
            max_elapsed_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Policy for local storage operations (shorter timeouts)
    pub fn local_storage() -> Self {
        Self {
            initial_interval_ms: 50,
            max_interval_ms: 1_000,
            max_elapsed_ms: 10_000,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Build the `backoff` schedule described by this policy
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(self.max_elapsed_ms)))
            .with_multiplier(self.multiplier)
            .build()
    }

    fn classify<E>(&self, op_name: &str, attempt: u32, err: E) -> backoff::Error<E>
    where
        E: RetryableError + Display,
    {
        if err.is_transient() && attempt < self.max_attempts.max(1) {
            warn!(
                operation = op_name,
                attempt,
                error = %err,
                "Transient failure, retrying"
            );
            backoff::Error::transient(err)
        } else {
            backoff::Error::permanent(err)
        }
    }
}

fn into_inner<E>(err: backoff::Error<E>) -> E {
    match err {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    }
}

/// Run a blocking operation, retrying transient failures per `policy`
///
/// The closure receives the 1-based attempt number. The last error is returned
/// once the error is permanent, attempts run out, or the time budget elapses.
pub fn retry_blocking<T, E, F>(op_name: &str, policy: &RetryPolicy, mut f: F) -> Result<T, E>
where
    E: RetryableError + Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 0u32;
    let result = backoff::retry(policy.to_backoff(), || {
        attempt += 1;
        debug!(operation = op_name, attempt, "Attempting operation");
        f(attempt).map_err(|err| policy.classify(op_name, attempt, err))
    });

    if result.is_ok() && attempt > 1 {
        debug!(operation = op_name, attempt, "Operation succeeded after retries");
    }
    result.map_err(into_inner)
}

/// Async counterpart of [`retry_blocking`], sleeping on the tokio timer
#[cfg(feature = "async-rt")]
pub async fn with_backoff<T, E, F, Fut>(op_name: &str, policy: &RetryPolicy, mut f: F) -> Result<T, E>
where
    E: RetryableError + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    backoff::future::retry(policy.to_backoff(), || {
        attempt += 1;
        let current = attempt;
        let fut = f(current);
        async move {
            fut.await
                .map_err(|err| policy.classify(op_name, current, err))
        }
    })
    .await
    .map_err(into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    impl RetryableError for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_interval_ms: 1,
            max_interval_ms: 2,
            max_elapsed_ms: 1_000,
            multiplier: 1.0,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_successful_operation() {
        let result: Result<&str, TestError> =
            retry_blocking("test_op", &fast_policy(), |_attempt| Ok("success"));
        assert_eq!(result.unwrap(), "success");
    }

    #[test]
    fn test_transient_failure_then_success() {
        let mut calls = 0;
        let result = retry_blocking("test_op", &fast_policy(), |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(TestError { transient: true })
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), TestError> = retry_blocking("test_op", &fast_policy(), |_| {
            calls += 1;
            Err(TestError { transient: false })
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_attempts_are_capped() {
        let mut calls = 0;
        let result: Result<(), TestError> = retry_blocking("test_op", &fast_policy(), |_| {
            calls += 1;
            Err(TestError { transient: true })
        });

        assert!(result.unwrap_err().transient);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_no_retry_policy() {
        let mut calls = 0;
        let result: Result<(), TestError> = retry_blocking("test_op", &RetryPolicy::no_retry(), |_| {
            calls += 1;
            Err(TestError { transient: true })
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[cfg(feature = "async-rt")]
    #[tokio::test]
    async fn test_async_transient_failure_then_success() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_backoff("test_op", &fast_policy(), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(TestError { transient: true })
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
