//! Retry policy: decides how many attempts an item gets and how long to back off.

use std::time::Duration;

/// Upper bound for a single backoff, whatever the multiplier does.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Retry policy shared by both executors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry budget. Sequential mode re-invokes while the retry count is below
    /// it; parallel mode gives up once an item's attempt number reaches it.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier. `1.0` keeps the delay constant.
    pub multiplier: f64,

    /// Draw the actual delay uniformly from `[0, delay)`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Backoff before retrying after the given failed attempt (1-based),
    /// before jitter: `base_delay * multiplier^(attempt - 1)`, capped.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs < 0.0 || secs > MAX_BACKOFF.as_secs_f64() {
            return MAX_BACKOFF;
        }
        Duration::from_secs_f64(secs)
    }

    /// Backoff with jitter applied when enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter {
            crate::manager::jittered(base)
        } else {
            base
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(1000),
            multiplier: 1.0,
            jitter: true,
        }
    }
}
