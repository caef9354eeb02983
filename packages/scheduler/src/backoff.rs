//! Retry backoff: exponential with jitter, applied by advancing
//! `next_run_at` rather than by sleeping in-process.

use chrono::Duration;
use rand::Rng;

/// `delay(n) = min(cap, base * 2^(n-1)) * U(0.5, 1.5)` for attempt `n`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::seconds(30),
            cap: Duration::minutes(15),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retrying after failed attempt number `attempt`
    /// (1-based).
    pub fn delay(&self, attempt: i32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same, with an injected rng so tests can pin the jitter.
    pub fn delay_with<R: Rng>(&self, attempt: i32, rng: &mut R) -> Duration {
        let exponent = attempt.max(1) - 1;
        let base_ms = self.base.num_milliseconds().max(1);
        let cap_ms = self.cap.num_milliseconds().max(base_ms);

        // Saturate instead of overflowing for absurd attempt counts.
        let raw_ms = base_ms
            .checked_shl(exponent.min(40) as u32)
            .unwrap_or(cap_ms)
            .min(cap_ms);

        let jitter: f64 = rng.gen_range(0.5..1.5);
        Duration::milliseconds((raw_ms as f64 * jitter) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn doubles_per_attempt_until_cap() {
        let policy = BackoffPolicy::default();
        // StepRng yields a constant stream, pinning jitter to one value.
        let mut rng = StepRng::new(u64::MAX / 2, 0);

        let first = policy.delay_with(1, &mut rng);
        let second = policy.delay_with(2, &mut rng);
        let third = policy.delay_with(3, &mut rng);

        assert_eq!(second.num_milliseconds(), first.num_milliseconds() * 2);
        assert_eq!(third.num_milliseconds(), first.num_milliseconds() * 4);
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=6 {
            let nominal = 30_000i64 << (attempt - 1);
            let nominal = nominal.min(policy.cap.num_milliseconds());
            for _ in 0..50 {
                let d = policy.delay(attempt).num_milliseconds();
                assert!(d >= nominal / 2, "attempt {}: {} too small", attempt, d);
                assert!(d < nominal * 3 / 2 + 1, "attempt {}: {} too large", attempt, d);
            }
        }
    }

    #[test]
    fn cap_bounds_the_raw_delay() {
        let policy = BackoffPolicy::default();
        let mut rng = StepRng::new(u64::MAX / 2, 0);
        // Attempt 20 would be ~182 hours uncapped.
        let d = policy.delay_with(20, &mut rng);
        assert!(d <= Duration::minutes(15) * 3 / 2 + Duration::seconds(1));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = BackoffPolicy::default();
        let d = policy.delay(i32::MAX);
        assert!(d > Duration::zero());
        assert!(d <= Duration::minutes(15) * 3 / 2 + Duration::seconds(1));
    }
}
