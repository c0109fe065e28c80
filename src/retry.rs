//! Exponential backoff retry helper shared by every bus operation (spec
//! §4.1, §4.8, §7): transport failures are retried in place, unbounded,
//! with delay `1s * 2^n` capped at 60s, rather than surfaced as terminal
//! per-file failures.

use crate::error::NldsError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule: base delay, cap, and whether attempts are bounded.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` means retry forever, as the bus transport policy requires.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// The bus transport policy from spec §4.1: `1s * 2^n`, capped at 60s,
    /// unbounded attempts.
    pub fn bus_transport() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        }
    }

    /// A bounded variant for per-file retry (spec §7): `max_retries`
    /// circulations through the indexer/transfer/archive loop, not a
    /// tight in-process retry loop — this is only used where a bounded
    /// backoff is explicitly wanted (e.g. RPC calls against the identity
    /// provider).
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(max_attempts),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let scaled = self.base_delay.saturating_mul(factor.min(u32::MAX as u64) as u32);
        scaled.min(self.max_delay)
    }
}

/// Retry `op` under `policy`, sleeping the backoff schedule between
/// attempts. Only errors for which [`NldsError::is_retryable`] is true are
/// retried; any other error is returned immediately on first occurrence.
pub async fn retry_transport<F, Fut, T>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, NldsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NldsError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        return Err(NldsError::RetriesExhausted {
                            attempts: attempt,
                            what: what.to_string(),
                        });
                    }
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    what,
                    error = %e,
                    "retrying after transport error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_schedule_doubles_then_caps() {
        let policy = RetryPolicy::bus_transport();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_transport(RetryPolicy::bus_transport(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, NldsError>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = retry_transport(RetryPolicy::bus_transport(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(NldsError::BusUnroutable {
                routing_key: "nlds.cat.complete".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_error_retries_until_bound_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: Some(3),
        };
        let result = retry_transport(policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(NldsError::BusTransport("down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(NldsError::RetriesExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
