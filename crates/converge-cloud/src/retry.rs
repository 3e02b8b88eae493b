//! Bounded exponential backoff for transient API failures

use crate::client::ApiResult;
use crate::error::{ReconcileError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{error, warn};

/// Retry policy applied to every client call the engine makes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "crate::duration::serde_str")]
    pub base_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Upper bound for a single delay
    #[serde(with = "crate::duration::serde_str")]
    pub max_delay: Duration,

    /// Total attempts including the first call (minimum 1)
    pub max_attempts: u32,

    /// Randomize each delay to 0.5x-1.5x
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * factor).min(self.max_delay)
    }
}

/// Run `call`, retrying retryable [`ApiError`](crate::client::ApiError)s
/// with backoff.
///
/// A non-retryable error surfaces immediately as [`ReconcileError::Api`];
/// running out of attempts surfaces as [`ReconcileError::TransientFailure`].
pub async fn retry_transient<F, Fut, T>(
    policy: &BackoffPolicy,
    operation: &str,
    call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    retry_transient_until(policy, operation, None, call).await
}

/// [`retry_transient`] bounded by `deadline`: backoff sleeps are cut to the
/// time left, and a retryable failure at or past the deadline ends the
/// retries as [`ReconcileError::TransientFailure`].
pub async fn retry_transient_until<F, Fut, T>(
    policy: &BackoffPolicy,
    operation: &str,
    deadline: Option<Instant>,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                let remaining =
                    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
                let out_of_time = remaining.is_some_and(|r| r.is_zero());

                if attempt >= max_attempts || out_of_time {
                    error!(
                        operation = %operation,
                        attempt = attempt,
                        out_of_time = out_of_time,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(ReconcileError::TransientFailure {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let mut delay = policy.next_delay(attempt - 1);
                if let Some(remaining) = remaining {
                    delay = delay.min(remaining);
                }
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                return Err(ReconcileError::Api {
                    operation: operation.to_string(),
                    source: e,
                });
            }
        }
    }
}
