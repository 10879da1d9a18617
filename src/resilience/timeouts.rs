//! Request deadlines.
//!
//! # Responsibilities
//! - Carry the originating request's time budget down the call chain
//! - Bound backoff sleeps and provider attempts by that budget
//!
//! # Design Decisions
//! - Uses Tokio's clock so paused-time tests drive it
//! - A sleep that would cross the deadline is not started at all

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

// Stand-in for "no deadline" when a budget overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Absolute point in time after which work for a request must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        Self(now.checked_add(budget).unwrap_or(now + FAR_FUTURE))
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Sleep for `delay` unless doing so would cross `deadline`.
///
/// Returns `false` without sleeping when the deadline would be crossed,
/// including when `delay` is too large to represent on the clock.
pub async fn sleep_within(delay: Duration, deadline: Option<Deadline>) -> bool {
    if let Some(deadline) = deadline {
        match Instant::now().checked_add(delay) {
            Some(wake) if wake <= deadline.instant() => {}
            _ => return false,
        }
    }
    time::sleep(delay).await;
    true
}

/// Run `fut` to completion or until `deadline`, whichever comes first.
pub async fn within<F: Future>(deadline: Option<Deadline>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => time::timeout_at(deadline.instant(), fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_within_budget() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let start = Instant::now();
        assert!(sleep_within(Duration::from_millis(500), Some(deadline)).await);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_refused_past_deadline() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let start = Instant::now();
        assert!(!sleep_within(Duration::from_secs(2), Some(deadline)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_delay_counts_as_crossing() {
        let deadline = Deadline::after(Duration::from_secs(30));
        assert!(!sleep_within(Duration::MAX, Some(deadline)).await);
        assert!(!sleep_within(Duration::from_secs(u64::MAX), Some(deadline)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_budget_does_not_overflow() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.has_elapsed());
        assert!(deadline.remaining() > Duration::from_secs(86_400 * 365));
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_cancels_slow_work() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let slow = async {
            time::sleep(Duration::from_secs(5)).await;
            42
        };
        assert_eq!(within(Some(deadline), slow).await, None);
        assert_eq!(within(None, async { 7 }).await, Some(7));
    }
}
