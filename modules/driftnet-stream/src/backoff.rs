use std::time::Duration;

use rand::Rng;

use crate::settings::StreamSettings;

/// Reconnect delay schedule for one upstream connection.
///
/// Exponential doubling from `base`, capped at `cap`, with uniform random
/// jitter on top. Rate-limit rejections are floored at `rate_limit_floor`
/// regardless of attempt count: reconnecting early against a rate limiter
/// escalates the penalty. There is no maximum attempt; callers retry until
/// closed.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    rate_limit_floor: Duration,
    jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, rate_limit_floor: Duration, jitter: Duration) -> Self {
        Self {
            base,
            cap,
            rate_limit_floor,
            jitter,
        }
    }

    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self::new(
            settings.backoff_base,
            settings.backoff_cap,
            settings.rate_limit_floor,
            settings.backoff_jitter,
        )
    }

    /// Delay before retry number `attempt` (1-based consecutive failures).
    pub fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let mut delay = self
            .base
            .saturating_mul(1u32 << exponent)
            .min(self.cap);
        if rate_limited && delay < self.rate_limit_floor {
            delay = self.rate_limit_floor;
        }
        delay + self.jitter_amount()
    }

    /// A streaming session longer than this counts as sustained success and
    /// resets the attempt counter.
    pub fn sustained_threshold(&self) -> Duration {
        self.cap
    }

    fn jitter_amount(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(320),
            Duration::from_secs(60),
            Duration::ZERO,
        )
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = policy_without_jitter();
        let delays: Vec<_> = (1..=12).map(|a| policy.delay(a, false)).collect();

        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delays must be non-decreasing");
        }
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[8], Duration::from_secs(256));
        assert_eq!(delays[9], Duration::from_secs(320), "capped");
        assert_eq!(delays[11], Duration::from_secs(320));
    }

    #[test]
    fn rate_limit_floor_applies_on_early_attempts() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay(1, true), Duration::from_secs(60));
        assert_eq!(policy.delay(6, true), Duration::from_secs(60));
        // Once the exponential schedule passes the floor, it wins.
        assert_eq!(policy.delay(8, true), Duration::from_secs(128));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(320),
            Duration::from_secs(60),
            Duration::from_millis(500),
        );
        for _ in 0..100 {
            let delay = policy.delay(1, false);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_millis(1500));
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay(u32::MAX, false), Duration::from_secs(320));
    }
}
