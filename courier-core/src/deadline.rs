//! Absolute deadlines for remote calls.
//!
//! A deadline is advisory: it is attached to the outgoing request and enforcement is
//! left to the transport.
use std::time::Duration;
use tokio::time::Instant;

/// `now + timeout`, or `None` when the deadline is too far out to be represented.
pub fn compute_deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left until `deadline`, saturating at zero once it has passed.
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_is_now_plus_timeout() {
        let before = Instant::now();
        let deadline = compute_deadline(Duration::from_millis(1500)).unwrap();

        assert_eq!(deadline - before, Duration::from_millis(1500));
        assert_eq!(remaining(deadline), Duration::from_millis(1500));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(remaining(deadline), Duration::ZERO);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_is_none() {
        assert_eq!(compute_deadline(Duration::MAX), None);
    }
}
