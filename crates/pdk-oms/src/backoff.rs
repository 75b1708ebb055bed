//! Exponential backoff with jitter for broker placement retries.

use rand::Rng;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Max placement attempts under one idempotency key.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// ± fraction applied to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Delay before retry number `attempt` (1-based: the delay after the
/// first failed attempt is `backoff_delay(p, 1)`).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.multiplier.powi(attempt.saturating_sub(1) as i32);
    let base_ms = (policy.initial_backoff.as_millis() as f64) * exp;
    let capped_ms = base_ms.min(policy.max_backoff.as_millis() as f64);

    let jitter = if policy.jitter > 0.0 {
        rand::thread_rng().gen_range(-policy.jitter..=policy.jitter)
    } else {
        0.0
    };
    let with_jitter = (capped_ms * (1.0 + jitter)).max(0.0);
    Duration::from_millis(with_jitter as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn grows_exponentially_without_jitter() {
        let p = no_jitter();
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(1000));
    }

    #[test]
    fn caps_at_max_backoff() {
        let p = no_jitter();
        assert_eq!(backoff_delay(&p, 20), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_inside_band() {
        let p = RetryPolicy::default();
        for _ in 0..100 {
            let d = backoff_delay(&p, 2).as_millis() as f64;
            assert!((400.0..=600.0).contains(&d), "got {d}ms");
        }
    }
}
