//! Pure reconnect policy: backoff schedule and close-frame classification.

use std::time::Duration;

/// What a closed socket told us, normalized across transport errors
/// (which carry no close frame) and server-sent close frames.
#[derive(Debug, Clone, Default)]
pub struct CloseInfo {
    /// WebSocket close code, when a close frame was received.
    pub code: Option<u16>,
    /// Close reason or transport error text.
    pub reason: String,
}

impl CloseInfo {
    /// Close info for a transport-level failure with no close frame.
    #[must_use]
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: message.into(),
        }
    }
}

/// Decides whether a close frame means the ticket was rejected.
///
/// Kept behind a trait so the heuristic can be swapped for a
/// protocol-exact detector (dedicated close code) without touching the
/// reconnect state machine.
pub trait AuthFailureDetector: Send + Sync {
    fn is_auth_failure(&self, close: &CloseInfo) -> bool;
}

/// Close codes treated as auth failures.
const AUTH_CLOSE_CODES: [u16; 2] = [4401, 4403];

/// Reason-text fragments treated as auth failures.
const AUTH_KEYWORDS: [&str; 5] = ["auth", "unauthorized", "forbidden", "ticket", "token"];

/// Default heuristic: a fixed set of close codes, or auth-related
/// keywords in the close reason.
#[derive(Debug, Default, Clone)]
pub struct DefaultAuthDetector;

impl AuthFailureDetector for DefaultAuthDetector {
    fn is_auth_failure(&self, close: &CloseInfo) -> bool {
        if close.code.is_some_and(|c| AUTH_CLOSE_CODES.contains(&c)) {
            return true;
        }
        let reason = close.reason.to_ascii_lowercase();
        AUTH_KEYWORDS.iter().any(|kw| reason.contains(kw))
    }
}

/// Bounded exponential backoff for ordinary reconnects.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub base_backoff: Duration,
    /// Cap applied before jitter.
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before the retry following failed attempt `attempt`
    /// (0-based): `min(max_backoff, base_backoff * 2^attempt) * jitter`,
    /// jitter clamped to `0.5..=1.5`. Pure, so the schedule is
    /// deterministic under a fixed jitter value.
    #[must_use]
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let base_ms = u64::try_from(self.base_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);

        let exponent = attempt.min(20);
        let scaled = base_ms.saturating_mul(1_u64 << exponent).min(max_ms);

        let jittered = (scaled as f64 * jitter.clamp(0.5, 1.5)) as u64;
        Duration::from_millis(jittered)
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
