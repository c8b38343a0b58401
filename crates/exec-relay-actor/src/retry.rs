//! Bounded retries with exponential backoff and fresh-handle resolution.

use std::time::Duration;

use rand::Rng;

/// Errors that carry an explicit transient/permanent classification.
///
/// Retry decisions are made on this flag alone — matching on error
/// message text is unreliable and deliberately unsupported.
pub trait Retryable {
    /// Whether another attempt could reasonably succeed.
    fn is_retryable(&self) -> bool;
}

/// Retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempt budget, including the first call.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub base_backoff: Duration,
    /// Cap applied before jitter.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Backoff before the retry following failed attempt `attempt` (0-based):
/// `min(max_backoff, base_backoff * 2^attempt) * jitter`, with `jitter`
/// drawn from `0.5..=1.5`.
///
/// Pure so the schedule is deterministic under a fixed jitter value.
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig, jitter: f64) -> Duration {
    let base_ms = u64::try_from(config.base_backoff.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(config.max_backoff.as_millis()).unwrap_or(u64::MAX);

    let exponent = attempt.min(20);
    let scaled = base_ms.saturating_mul(1_u64 << exponent).min(max_ms);

    let jittered = (scaled as f64 * jitter.clamp(0.5, 1.5)) as u64;
    Duration::from_millis(jittered)
}

/// Run `op` against a freshly-resolved actor handle, retrying transient
/// failures.
///
/// Each attempt re-invokes `resolve` — the actor may have moved or been
/// evicted since the last try. Worst case makes exactly
/// `max_attempts` resolve/operation calls and `max_attempts - 1` sleeps;
/// a non-retryable error short-circuits with no further attempts.
///
/// # Errors
/// Returns the last error once the budget is exhausted, or the first
/// non-retryable error immediately.
pub async fn call_with_retries<H, T, E, R, RFut, Op, OpFut>(
    config: &RetryConfig,
    label: &str,
    mut resolve: R,
    mut op: Op,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<H, E>>,
    Op: FnMut(H) -> OpFut,
    OpFut: Future<Output = Result<T, E>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let result = match resolve().await {
            Ok(handle) => op(handle).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() {
                    tracing::debug!(label, attempt, error = %e, "actor call failed permanently");
                    return Err(e);
                }
                if attempt + 1 >= attempts {
                    tracing::warn!(label, attempt, error = %e, "actor call retry budget exhausted");
                    return Err(e);
                }

                let delay = backoff_delay(attempt, config, jitter());
                tracing::debug!(
                    label,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "actor call failed; retrying with a fresh handle"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn jitter() -> f64 {
    rand::rng().random_range(0.5..=1.5)
}
