//! Bounded retries with exponential backoff around adapter calls.

use std::future::Future;
use std::time::Duration;

use herald_core::{ClusterError, ClusterResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> ClusterResult<()> {
        if self.max_attempts == 0 {
            return Err(ClusterError::invalid("retry.max_attempts must be positive"));
        }
        if self.base_backoff > self.max_backoff {
            return Err(ClusterError::invalid(
                "retry.base_backoff_ms exceeds retry.max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base_backoff;
        }
        let shift = std::cmp::min(attempt - 1, 10);
        let value = self.base_backoff.saturating_mul(1_u32 << shift);
        std::cmp::min(value, self.max_backoff)
    }

    /// Next request size after a timeout; never below one.
    pub fn shrink(&self, limit: u32) -> u32 {
        std::cmp::max(limit / 2, 1)
    }
}

/// Outcome of a retried call plus the request size it finished with.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: ClusterResult<T>,
    pub limit: u32,
    pub retries: u32,
}

/// Await `fut`, converting an elapsed deadline into [`ClusterError::Timeout`].
pub async fn timed<T, F>(call_timeout: Duration, what: &str, fut: F) -> ClusterResult<T>
where
    F: Future<Output = ClusterResult<T>>,
{
    match tokio::time::timeout(call_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::timeout(format!(
            "{what} exceeded {}ms",
            call_timeout.as_millis()
        ))),
    }
}

/// Call `op(limit)`; on timeout back off, halve `limit` and try again.
pub async fn with_shrinking_retry<T, F, Fut>(
    policy: RetryPolicy,
    call_timeout: Duration,
    what: &str,
    limit: u32,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ClusterResult<T>>,
{
    let mut limit = std::cmp::max(limit, 1);
    let mut attempt = 1;
    loop {
        let result = timed(call_timeout, what, op(limit)).await;
        match result {
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                let next = policy.shrink(limit);
                log::warn!(
                    "herald.engine: {what} attempt {attempt} failed ({err}); retrying in {}ms with limit {next}",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                limit = next;
                attempt += 1;
            }
            result => {
                return Attempted {
                    result,
                    limit,
                    retries: attempt - 1,
                };
            }
        }
    }
}

/// Retry a fixed-size call (a write) on timeout.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    call_timeout: Duration,
    what: &str,
    mut op: F,
) -> ClusterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClusterResult<T>>,
{
    with_shrinking_retry(policy, call_timeout, what, 1, |_| op())
        .await
        .result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn shrink_halves_with_floor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.shrink(500), 250);
        assert_eq!(policy.shrink(3), 1);
        assert_eq!(policy.shrink(1), 1);
    }

    #[tokio::test]
    async fn timeouts_shrink_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempted = with_shrinking_retry(
            fast_policy(4),
            Duration::from_secs(1),
            "fetch",
            64,
            move |limit| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ClusterError::timeout("slow"))
                    } else {
                        Ok(limit)
                    }
                }
            },
        )
        .await;
        assert_eq!(attempted.result.expect("result"), 16);
        assert_eq!(attempted.limit, 16);
        assert_eq!(attempted.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_timeout() {
        let attempted: Attempted<()> = with_shrinking_retry(
            fast_policy(3),
            Duration::from_secs(1),
            "fetch",
            8,
            |_| async { Err(ClusterError::timeout("slow")) },
        )
        .await;
        assert!(matches!(attempted.result, Err(ClusterError::Timeout { .. })));
        assert_eq!(attempted.retries, 2);
        assert_eq!(attempted.limit, 2);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ClusterResult<()> =
            with_retry(fast_policy(5), Duration::from_secs(1), "write", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClusterError::unavailable("down")) }
            })
            .await;
        assert!(matches!(result, Err(ClusterError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn elapsed_deadline_is_a_timeout() {
        let result: ClusterResult<()> = timed(Duration::from_millis(5), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ClusterError::Timeout { .. })));
    }
}
