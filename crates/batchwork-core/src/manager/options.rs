//! Manager configuration.
//!
//! Options are plain serde data so they can come from a JSON document.
//! Missing fields take their defaults and unknown fields are ignored:
//!
//! ```ignore
//! let options = ManagerOptions::from_json(r#"{ "mode": "parallel", "maxInFlight": 8 }"#)?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::queue::RetryPolicy;

/// Execution mode, fixed for the lifetime of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One task at a time, strict submission order.
    #[default]
    Sequential,

    /// Up to `max_in_flight` tasks at a time.
    Parallel,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Sequential => "sequential",
            Mode::Parallel => "parallel",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Mode::Sequential),
            "parallel" => Ok(Mode::Parallel),
            _ => Err(BatchError::UnknownMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerOptions {
    /// Maximum number of unresolved items (pending plus errored) before
    /// `submit` blocks.
    pub unresolved_batch_limit: usize,

    pub mode: Mode,

    /// Retry budget per item.
    pub max_retries: u32,

    /// Concurrency cap (parallel mode only).
    pub max_in_flight: usize,

    /// Period of the fallback drain tick.
    pub drain_interval_ms: u64,

    /// Backoff before a retry.
    pub retry_backoff_ms: u64,

    pub backoff_multiplier: f64,

    /// Randomize each backoff within `[0, backoff)`.
    pub backoff_jitter: bool,

    /// How often a blocked `submit` re-checks for space when no wakeup arrives.
    pub admission_poll_ms: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            unresolved_batch_limit: 100,
            mode: Mode::Sequential,
            max_retries: 10,
            max_in_flight: 50,
            drain_interval_ms: 500,
            retry_backoff_ms: 1000,
            backoff_multiplier: 1.0,
            backoff_jitter: true,
            admission_poll_ms: 100,
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ManagerOptions {
    pub fn from_json(json: &str) -> Result<Self, BatchError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, BatchError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_unresolved_batch_limit(mut self, limit: usize) -> Self {
        self.unresolved_batch_limit = limit;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration, jitter: bool) -> Self {
        self.retry_backoff_ms = saturating_millis(backoff);
        self.backoff_jitter = jitter;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = saturating_millis(interval);
        self
    }

    /// Fail fast on values the executors cannot work with.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.unresolved_batch_limit == 0 {
            return Err(BatchError::invalid("unresolvedBatchLimit", "must be greater than 0"));
        }
        if self.mode == Mode::Parallel && self.max_in_flight == 0 {
            return Err(BatchError::invalid("maxInFlight", "must be greater than 0"));
        }
        if self.drain_interval_ms == 0 {
            return Err(BatchError::invalid("drainIntervalMs", "must be greater than 0"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 0.0 {
            return Err(BatchError::invalid(
                "backoffMultiplier",
                format!("must be a non-negative number, got {}", self.backoff_multiplier),
            ));
        }
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn admission_poll(&self) -> Duration {
        Duration::from_millis(self.admission_poll_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            multiplier: self.backoff_multiplier,
            jitter: self.backoff_jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let options = ManagerOptions::default();
        assert_eq!(options.unresolved_batch_limit, 100);
        assert_eq!(options.mode, Mode::Sequential);
        assert_eq!(options.max_retries, 10);
        assert_eq!(options.max_in_flight, 50);
        assert_eq!(options.drain_interval(), Duration::from_millis(500));
    }

    #[test]
    fn missing_fields_default_and_unknown_fields_are_ignored() {
        let options = ManagerOptions::from_json(
            r#"{ "mode": "parallel", "maxRetries": 3, "somethingElse": true }"#,
        )
        .unwrap();
        assert_eq!(options.mode, Mode::Parallel);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.unresolved_batch_limit, 100);
        assert_eq!(options.max_in_flight, 50);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = ManagerOptions::from_value(json!({ "mode": "turbo" })).unwrap_err();
        assert!(matches!(err, BatchError::Options(_)));
        assert!(matches!("turbo".parse::<Mode>(), Err(BatchError::UnknownMode(_))));
    }

    #[rstest]
    #[case::zero_limit(ManagerOptions::default().with_unresolved_batch_limit(0), "unresolvedBatchLimit")]
    #[case::zero_in_flight(
        ManagerOptions::default().with_mode(Mode::Parallel).with_max_in_flight(0),
        "maxInFlight"
    )]
    #[case::zero_drain(
        ManagerOptions::default().with_drain_interval(Duration::ZERO),
        "drainIntervalMs"
    )]
    fn validate_rejects(#[case] options: ManagerOptions, #[case] expected_field: &str) {
        match options.validate() {
            Err(BatchError::InvalidOptions { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected InvalidOptions, got {other:?}"),
        }
    }

    #[rstest]
    #[case("sequential", Mode::Sequential)]
    #[case("Parallel", Mode::Parallel)]
    #[case(" parallel ", Mode::Parallel)]
    fn mode_parses(#[case] raw: &str, #[case] expected: Mode) {
        assert_eq!(raw.parse::<Mode>().unwrap(), expected);
    }

    #[test]
    fn oversized_durations_saturate() {
        let options = ManagerOptions::default()
            .with_retry_backoff(Duration::MAX, false)
            .with_drain_interval(Duration::MAX);
        assert_eq!(options.retry_backoff_ms, u64::MAX);
        assert_eq!(options.drain_interval_ms, u64::MAX);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn retry_policy_follows_options() {
        let policy = ManagerOptions::default()
            .with_max_retries(2)
            .with_retry_backoff(Duration::from_millis(250), false)
            .retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.next_delay(1), Duration::from_millis(250));
    }
}
