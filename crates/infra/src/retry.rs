//! Retry/backoff policy for records the dispatcher fails to deliver.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outbox::DeliveryState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    #[default]
    Exponential,
    Linear,
}

/// How long a failed record waits before the next attempt, and when it is
/// parked for an operator instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts before the record is parked. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(20),
            base_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(60 * 60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Retry on every tick, never park.
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: Option<u32>, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay after the `attempt`-th failure (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms.min(max_ms),
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    pub fn should_park(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }

    /// Bookkeeping after one more failure of `event_id` at `now`.
    pub fn record_failure(
        &self,
        previous: Option<&DeliveryState>,
        event_id: Uuid,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DeliveryState {
        let attempts = previous.map(|p| p.attempts).unwrap_or(0).saturating_add(1);
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempts))
            .unwrap_or_else(|_| chrono::Duration::days(1));

        DeliveryState {
            event_id,
            attempts,
            last_error: error.into(),
            next_attempt_at: now + delay,
            parked: self.should_park(attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_doubles_until_cap() {
        let p = RetryPolicy::exponential(Some(5), Duration::from_secs(15), Duration::from_secs(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(15));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(30));
        assert_eq!(p.delay_for_attempt(3), Duration::from_secs(60));
        assert_eq!(p.delay_for_attempt(4), Duration::from_secs(100));
    }

    #[test]
    fn immediate_policy_never_parks_or_waits() {
        let p = RetryPolicy::immediate();
        let now = Utc::now();
        let state = p.record_failure(None, Uuid::now_v7(), "boom", now);
        assert_eq!(state.next_attempt_at, now);
        assert!(!state.parked);
        assert!(!p.should_park(u32::MAX));
    }

    #[test]
    fn parks_on_the_last_allowed_attempt() {
        let p = RetryPolicy::exponential(Some(2), Duration::from_secs(1), Duration::from_secs(1));
        let now = Utc::now();
        let id = Uuid::now_v7();

        let first = p.record_failure(None, id, "a", now);
        assert_eq!(first.attempts, 1);
        assert!(!first.parked);

        let second = p.record_failure(Some(&first), id, "b", now);
        assert_eq!(second.attempts, 2);
        assert!(second.parked);
        assert_eq!(second.last_error, "b");
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(attempt in 0u32..10_000, base in 0u64..120, cap in 0u64..7200) {
            for strategy in [BackoffStrategy::Fixed, BackoffStrategy::Exponential, BackoffStrategy::Linear] {
                let p = RetryPolicy {
                    max_attempts: None,
                    base_delay: Duration::from_secs(base),
                    max_delay: Duration::from_secs(cap),
                    strategy,
                };
                prop_assert!(p.delay_for_attempt(attempt) <= Duration::from_secs(cap));
            }
        }
    }
}
