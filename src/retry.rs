//! Retry policies shared across the SDK.
//!
//! Two surfaces need retries with very different shapes: the REST client
//! makes bounded, short-lived attempts, while the feed worker runs an
//! open-ended reconnect loop with a fixed delay.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Delay applied between reconnect attempts of the event feed.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Policy driving the feed worker's reconnect loop.
///
/// The default waits a fixed [`RECONNECT_DELAY`] between attempts, applies
/// no jitter, and never gives up. `max_attempts` bounds *consecutive failed
/// connection attempts*; a session that establishes a connection resets the
/// count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay between the end of one connection and the next attempt.
    pub delay: Duration,
    /// Maximum consecutive failed connection attempts, `None` for unbounded.
    pub max_attempts: Option<usize>,
}

impl ReconnectPolicy {
    /// Returns an unbounded policy with the given fixed delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Returns `true` once `failures` consecutive failed attempts exhaust
    /// the policy.
    pub fn exhausted(&self, failures: usize) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(RECONNECT_DELAY)
    }
}

/// Policy controlling bounded request retries.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Fixed delay applied before each retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Returns a low-latency default suitable for short-lived API requests.
    pub fn low_latency() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(25),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::low_latency()
    }
}

/// Executes an async operation with retry behavior controlled by `policy`.
///
/// `op` receives the 1-based attempt number and must return a future that
/// resolves to the operation result. `should_retry` determines whether each
/// error is retryable.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }

                debug!(
                    event = "retry_attempt_failed",
                    attempt,
                    max_attempts,
                    delay_ms = policy.backoff.as_millis() as u64
                );
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    unreachable!("max_attempts is always at least 1")
}
