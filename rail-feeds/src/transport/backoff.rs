//! Reconnect backoff policy.

use std::time::Duration;

/// Exponential backoff: the delay doubles from `base` per attempt, is
/// capped at `cap`, and gives up after `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// retry budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn never_exceeds_cap_and_never_shrinks(base_ms in 1u64..5_000, cap_ms in 1u64..120_000, max in 1u32..40) {
            let backoff = Backoff::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms), max);
            let mut previous = Duration::ZERO;
            for attempt in 1..=max {
                let d = backoff.delay(attempt).unwrap();
                prop_assert!(d <= backoff.cap);
                prop_assert!(d >= previous);
                previous = d;
            }
            prop_assert!(backoff.delay(max + 1).is_none());
        }
    }
}
