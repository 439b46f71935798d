//! Exponential backoff with jitter for provider requests.
//!
//! Made public so callers can reuse it for their own operations that
//! need the same retry discipline.

use crate::cancellation::CancellationSignal;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Up to 10 attempts, base delay ~1s, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Full-jitter exponential backoff: a uniformly random delay between 0
/// and `min(max_delay, base_delay * 2^(attempt-1))`.
pub fn compute_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(20); // guard against overflow
    let unclamped = base_delay.saturating_mul(1u32 << exp);
    let cap = unclamped.min(max_delay);
    if cap.is_zero() {
        return cap;
    }
    let jitter_fraction: f64 = rand::random();
    cap.mul_f64(jitter_fraction)
}

/// Run `operation` with retry. `should_retry` decides whether a given
/// error is retryable (network/timeout/5xx — never 4xx auth failures).
/// `on_attempt` is called before each backoff sleep
/// (wire it to emit `retry_attempt`); `on_exhausted` is called once if
/// every attempt fails or a non-retryable error is hit (wire it to
/// emit `retry_exhausted`). The backoff sleep itself is cancellable.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancellation: &CancellationSignal,
    mut should_retry: impl FnMut(&Error) -> bool,
    mut on_attempt: impl FnMut(u32, Duration, &Error),
    mut on_exhausted: impl FnMut(u32, &Error),
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts || !should_retry(&err) {
                    on_exhausted(attempt, &err);
                    return Err(err);
                }
                let delay = compute_delay(attempt, config.base_delay, config.max_delay);
                log::debug!("retrying after attempt {attempt} failed: {err}; sleeping {delay:?}");
                on_attempt(attempt, delay, &err);
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(Error::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
