//! Retry policies for instrument transactions.
//
// Instruments on a shared GPIB/USB adapter occasionally drop a reply while
// another device is still settling. Queries are therefore retried a fixed
// number of times with a fixed backoff before the failure is surfaced.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Number of query attempts before giving up.
pub const DEFAULT_QUERY_ATTEMPTS: u32 = 10;

/// Pause between two query attempts.
pub const DEFAULT_QUERY_BACKOFF: Duration = Duration::from_millis(100);

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts (at least one is always made).
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_QUERY_ATTEMPTS,
            backoff_delay: DEFAULT_QUERY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::ZERO,
        }
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// Returns the last error together with the number of attempts made.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err((err, attempt)),
            Err(err) => {
                warn!(
                    operation = label,
                    attempt,
                    max_attempts = attempts,
                    "retrying after error: {}",
                    err
                );
                if !policy.backoff_delay.is_zero() {
                    sleep(policy.backoff_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1),
        };
        let result: Result<u32, (String, u32)> = retry_with_policy(&policy, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 2 {
                    Ok(n)
                } else {
                    Err("not yet".to_string())
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1),
        };
        let result: Result<(), (String, u32)> = retry_with_policy(&policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("always".to_string()) }
        })
        .await;
        assert_eq!(result, Err(("always".to_string(), 3)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_policy_matches_protocol_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff_delay, Duration::from_millis(100));
        assert_eq!(RetryPolicy::once().max_attempts, 1);
    }
}
