use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff with jitter, applied after consecutive failed
/// device fetches. Zero failures never reaches this policy; that case is
/// governed by the idle/active poll intervals.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            factor: 2.0,
            max: Duration::from_secs(120),
        }
    }
}

impl BackoffPolicy {
    /// `min(initial * factor^(failures-1), max)` plus up to one second of
    /// uniform jitter so multiple workers do not re-attempt in lockstep.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        let base = self.base_delay(consecutive_failures);
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        base + Duration::from_secs_f64(jitter)
    }

    fn base_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(32);
        let scaled = self.initial.as_secs_f64() * self.factor.powi(exponent as i32);
        if scaled.is_finite() && scaled < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(5),
            factor: 2.0,
            max: Duration::from_secs(120),
        }
    }

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let policy = policy();
        for (failures, base_secs) in [(1u32, 5.0f64), (2, 10.0), (3, 20.0), (4, 40.0), (5, 80.0)] {
            let delay = policy.next_delay(failures).as_secs_f64();
            assert!(
                delay >= base_secs && delay < base_secs + 1.0,
                "failures={failures}: {delay} outside [{base_secs}, {})",
                base_secs + 1.0
            );
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = policy();
        for failures in [6u32, 10, 30, u32::MAX] {
            let delay = policy.next_delay(failures).as_secs_f64();
            assert!(delay >= 120.0 && delay < 121.0, "failures={failures}: {delay}");
        }
    }

    #[test]
    fn jitter_is_not_constant() {
        let policy = policy();
        let first = policy.next_delay(1);
        let distinct = (0..64).any(|_| policy.next_delay(1) != first);
        assert!(distinct, "64 samples produced identical jitter");
    }
}
