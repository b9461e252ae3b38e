//! Idle-timeout policy: the eviction threshold and the derivation of the
//! multiplexer's next wait interval from the oldest surviving connection.

use std::time::{Duration, Instant};

/// Uniform inactivity threshold applied to every connection in both sets.
#[derive(Debug, Clone, Copy)]
pub struct IdlePolicy {
    threshold: Duration,
}

impl IdlePolicy {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// True when a connection last active at `last` is due for eviction.
    /// The boundary itself counts as expired.
    pub fn expired(&self, last: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last) >= self.threshold
    }
}

/// Running minimum of the last-activity timestamps seen while passing over
/// the two connection sets in one iteration.
#[derive(Debug, Default)]
pub struct DeadlineTracker {
    oldest: Option<Instant>,
}

impl DeadlineTracker {
    pub fn new() -> Self {
        Self { oldest: None }
    }

    /// Records a surviving connection's last activity.
    pub fn observe(&mut self, last: Instant) {
        self.oldest = Some(match self.oldest {
            Some(current) => current.min(last),
            None => last,
        });
    }

    /// The oldest activity observed this iteration, if any connection
    /// survived.
    pub fn oldest(&self) -> Option<Instant> {
        self.oldest
    }

    /// How long the multiplexer may block before the oldest surviving
    /// connection crosses the threshold: zero if it is already due, `None`
    /// (wait indefinitely) when no connection is registered.
    pub fn next_wait(&self, policy: IdlePolicy, now: Instant) -> Option<Duration> {
        self.oldest
            .map(|oldest| (oldest + policy.threshold()).saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_includes_the_exact_boundary() {
        let policy = IdlePolicy::new(Duration::from_secs(5));
        let now = Instant::now();
        assert!(policy.expired(now - Duration::from_secs(5), now));
        assert!(policy.expired(now - Duration::from_secs(6), now));
        assert!(!policy.expired(now - Duration::from_millis(4_999), now));
        assert!(!policy.expired(now, now));
    }

    #[test]
    fn zero_threshold_expires_everything() {
        let policy = IdlePolicy::new(Duration::ZERO);
        let now = Instant::now();
        assert!(policy.expired(now, now));
    }

    #[test]
    fn observe_keeps_the_minimum_regardless_of_order() {
        let now = Instant::now();
        let older = now - Duration::from_secs(3);
        let oldest = now - Duration::from_secs(7);

        let mut tracker = DeadlineTracker::new();
        tracker.observe(older);
        tracker.observe(oldest);
        tracker.observe(now);
        assert_eq!(tracker.oldest(), Some(oldest));
    }

    #[test]
    fn next_wait_is_time_remaining_until_the_oldest_expires() {
        let policy = IdlePolicy::new(Duration::from_secs(5));
        let now = Instant::now();
        let mut tracker = DeadlineTracker::new();
        tracker.observe(now - Duration::from_secs(3));
        assert_eq!(tracker.next_wait(policy, now), Some(Duration::from_secs(2)));
    }

    #[test]
    fn next_wait_clamps_to_zero_when_overdue() {
        let policy = IdlePolicy::new(Duration::from_secs(5));
        let now = Instant::now();
        let mut tracker = DeadlineTracker::new();
        tracker.observe(now - Duration::from_secs(9));
        assert_eq!(tracker.next_wait(policy, now), Some(Duration::ZERO));
    }

    #[test]
    fn empty_tracker_waits_indefinitely() {
        let policy = IdlePolicy::new(Duration::from_secs(5));
        let tracker = DeadlineTracker::new();
        assert_eq!(tracker.next_wait(policy, Instant::now()), None);
    }
}
