//! Retry policy for backend operations.
//!
//! The default policy never gives up: a fixed five second pause between
//! attempts, no attempt cap, no deadline. Bounded policies exist for tests and
//! for hosts that would rather surface a failure than wait out an outage.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{HelpdeskError, Result};

/// Pause between attempts of the default policy
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long to wait after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(n-1)` after the n-th failure, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay following failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1 << exponent).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Give up once the next wait would end past this much elapsed time
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential { base, max },
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.deadline.is_none()
    }

    fn gives_up(&self, attempt: u32, elapsed: Duration, next_delay: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
            || self
                .deadline
                .is_some_and(|deadline| elapsed.saturating_add(next_delay) > deadline)
    }
}

/// Run `operation` until it succeeds, the policy gives up, or `cancel` fires.
///
/// Every error counts as a failed attempt, whatever its kind. The closure
/// receives the 1-based attempt number.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            tracing::debug!(operation, attempt, "Retry loop cancelled");
            return Err(HelpdeskError::Cancelled);
        }

        attempt += 1;
        let error = match attempt_fn(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let delay = policy.backoff.delay(attempt);
        if policy.gives_up(attempt, started.elapsed(), delay) {
            tracing::error!(operation, attempt, error = %error, "Giving up");
            return Err(HelpdeskError::RetryExhausted {
                attempts: attempt,
                last_error: Box::new(error),
            });
        }

        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(operation, attempt, "Retry loop cancelled");
                return Err(HelpdeskError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
