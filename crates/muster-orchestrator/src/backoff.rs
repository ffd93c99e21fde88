//! Exponential backoff for infrastructure reachability.
//!
//! Kept apart from health thresholds: only unreachable servers, missing
//! tools and timeouts count here, and any tool call that returns resets it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use muster_types::BackoffStatus;

/// `base × 2^min(failures - 1, cap)`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub cap: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(1800),
            cap: 6,
        }
    }
}

impl BackoffPolicy {
    /// Delay after `failures` consecutive failures. Zero failures, zero delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(self.cap).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Count one more failure and push `next_retry_after` out accordingly.
    pub fn record_failure(&self, status: &mut BackoffStatus, now: DateTime<Utc>) -> Duration {
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        let delay = self.delay(status.consecutive_failures);
        status.next_retry_after = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        delay
    }
}
