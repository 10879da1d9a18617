//! Exponential backoff with symmetric jitter.

use std::time::Duration;

use crate::resilience::retries::RetryPolicy;
use crate::rng::RandomSource;

/// Delay before jitter: `min(initial_delay * backoff_multiplier^attempt, max_delay)`.
pub fn base_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = policy.initial_delay.as_secs_f64() * policy.backoff_multiplier.powi(exponent);
    let max = policy.max_delay.as_secs_f64();
    if !secs.is_finite() || secs > max {
        return policy.max_delay;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// Calculate the delay after failed attempt `attempt` (zero based).
///
/// The base delay is spread uniformly over `base * (1 ± jitter_factor)` and
/// never exceeds `max_delay`.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy, rng: &dyn RandomSource) -> Duration {
    let base = base_delay(attempt, policy).as_secs_f64();
    let spread = policy.jitter_factor * (2.0 * rng.next_f64() - 1.0);
    let jittered = (base * (1.0 + spread)).max(0.0);
    if !jittered.is_finite() {
        return policy.max_delay;
    }
    Duration::from_secs_f64(jittered).min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{SequenceRandom, ThreadRandom};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let p = policy();
        assert_eq!(base_delay(0, &p), Duration::from_millis(100));
        assert_eq!(base_delay(1, &p), Duration::from_millis(200));
        assert_eq!(base_delay(3, &p), Duration::from_millis(800));
        assert_eq!(base_delay(10, &p), Duration::from_millis(2000));
        assert_eq!(base_delay(u32::MAX, &p), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        let rng = ThreadRandom;
        for attempt in 0..8 {
            let base = base_delay(attempt, &p).as_secs_f64();
            for _ in 0..200 {
                let d = calculate_backoff(attempt, &p, &rng).as_secs_f64();
                assert!(d >= base * 0.8 - 1e-9, "attempt {} delay {} below band", attempt, d);
                assert!(d <= base * 1.2 + 1e-9, "attempt {} delay {} above band", attempt, d);
                assert!(d <= p.max_delay.as_secs_f64() + 1e-9);
            }
        }
    }

    #[test]
    fn test_jitter_extremes() {
        let p = policy();
        let low = calculate_backoff(1, &p, &SequenceRandom::constant(0.0));
        assert!((low.as_secs_f64() - 0.160).abs() < 1e-6);
        let mid = calculate_backoff(1, &p, &SequenceRandom::constant(0.5));
        assert!((mid.as_secs_f64() - 0.200).abs() < 1e-6);
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let p = policy();
        let d = calculate_backoff(20, &p, &SequenceRandom::constant(0.99));
        assert_eq!(d, p.max_delay);
    }
}
