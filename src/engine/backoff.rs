//! Capped exponential backoff with additive jitter.

use rand::Rng;
use tokio::time::Duration;

/// Retry delay policy: `min(max, base * 2^(attempt-1)) + jitter(0, base)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// First-attempt delay and jitter window width.
    pub base: Duration,
    /// Cap on the deterministic component.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Deterministic component of the delay for `attempt` (1-based).
    /// Non-decreasing in `attempt`, capped at `max`.
    pub fn floor_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        // 2^63 ms overflows any practical cap; clamp the shift.
        let exp = attempt.saturating_sub(1).min(62);
        let ms = base_ms.saturating_mul(1u64 << exp).min(max_ms);
        Duration::from_millis(ms)
    }

    /// Full delay for `attempt`: the floor plus uniform jitter in
    /// `[0, base)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..base_ms)
        };
        self.floor_delay(attempt) + Duration::from_millis(jitter_ms)
    }
}
