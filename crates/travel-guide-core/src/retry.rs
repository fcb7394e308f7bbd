//! Provider error classification and bounded linear backoff.
//!
//! Every upstream call (embedding or LLM) reports failures as a
//! [`ProviderError`], which separates throttling from everything else.
//! [`RetryPolicy`] decides, purely from the attempt number and the error,
//! whether to wait and try again. [`retry_with_backoff`] runs that loop
//! with a caller-supplied sleep function so it stays independent of the
//! async runtime and can be driven by a fake clock in tests.
//!
//! # Schedule
//!
//! With `max_attempts = 3` and `backoff = 10s`:
//!
//! ```text
//! attempt 1 ── rate limited ── sleep 10s
//! attempt 2 ── rate limited ── sleep 20s
//! attempt 3 ── rate limited ── give up (RateLimited surfaced)
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by an embedding or LLM provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider throttled the request (HTTP 429 or equivalent).
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Any other failure: transport, auth, malformed response, 5xx.
    #[error("{0}")]
    Failed(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded, linearly increasing backoff for rate-limited calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; `0` is treated as `1`.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    pub fn decide(&self, attempt: u32, err: &ProviderError) -> RetryDecision {
        if err.is_rate_limited() && attempt < self.max_attempts {
            RetryDecision::RetryAfter(self.delay_after(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Run `op` until it succeeds or `policy` gives up.
///
/// `op` receives the 1-based attempt number. `sleep` is awaited between
/// attempts with the delay chosen by the policy; production code passes
/// `tokio::time::sleep`.
pub async fn retry_with_backoff<T, Op, Fut, Sleep, SleepFut>(
    policy: &RetryPolicy,
    mut sleep: Sleep,
    mut op: Op,
) -> Result<T, ProviderError>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    Sleep: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match policy.decide(attempt, &err) {
                RetryDecision::RetryAfter(delay) => {
                    sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_linear_schedule() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let throttled = ProviderError::RateLimited("429".into());
        assert_eq!(
            policy.decide(1, &throttled),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            policy.decide(2, &throttled),
            RetryDecision::RetryAfter(Duration::from_secs(20))
        );
        assert_eq!(policy.decide(3, &throttled), RetryDecision::GiveUp);
    }

    #[test]
    fn test_other_errors_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let failed = ProviderError::Failed("401 unauthorized".into());
        assert_eq!(policy.decide(1, &failed), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_always_throttled_exhausts_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        let calls = Cell::new(0u32);
        let waits = RefCell::new(Vec::new());

        let result: Result<(), _> = retry_with_backoff(
            &policy,
            |d| {
                waits.borrow_mut().push(d);
                std::future::ready(())
            },
            |_| {
                calls.set(calls.get() + 1);
                std::future::ready(Err(ProviderError::RateLimited("slow down".into())))
            },
        )
        .await;

        assert_eq!(result, Err(ProviderError::RateLimited("slow down".into())));
        assert_eq!(calls.get(), 3);
        let waits = waits.into_inner();
        assert_eq!(waits.len(), 2);
        assert!(waits.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_recovers_after_throttle() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = retry_with_backoff(
            &policy,
            |_| std::future::ready(()),
            |attempt| {
                std::future::ready(if attempt < 2 {
                    Err(ProviderError::RateLimited("429".into()))
                } else {
                    Ok(attempt)
                })
            },
        )
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_failure_returns_immediately() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::new(3, Duration::from_millis(1)),
            |_| std::future::ready(()),
            |_| {
                calls.set(calls.get() + 1);
                std::future::ready(Err(ProviderError::Failed("boom".into())))
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
