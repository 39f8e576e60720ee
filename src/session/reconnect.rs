//! Reconnection backoff policy.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Delays between consecutive failed attempts, capped at the last entry.
pub const BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];

/// Consecutive failed attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Counts consecutive failed attempts and picks the next delay.
///
/// The first attempt after a session drops is immediate; the delay before
/// every later attempt follows the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    schedule: Vec<Duration>,
    max_attempts: u32,
    attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(BACKOFF_SCHEDULE.to_vec(), MAX_RECONNECT_ATTEMPTS)
    }
}

impl ReconnectPolicy {
    /// Creates a policy with a custom schedule and attempt cap.
    #[must_use]
    pub fn new(schedule: Vec<Duration>, max_attempts: u32) -> Self {
        Self {
            schedule,
            max_attempts,
            attempts: 0,
        }
    }

    /// Records a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once
    /// `max_attempts` consecutive attempts have failed.
    pub fn record_failure(&mut self) -> Option<Duration> {
        let index = self.attempts as usize;
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts >= self.max_attempts {
            return None;
        }

        let last = self.schedule.len().checked_sub(1)?;
        self.schedule.get(index.min(last)).copied()
    }

    /// Forgets previous failures after a successful handshake.
    #[inline]
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failed attempts so far.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `true` once no further attempt will be scheduled.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    #[test]
    fn test_default_schedule_until_exhausted() {
        let mut policy = ReconnectPolicy::default();

        assert_eq!(policy.record_failure(), secs(1));
        assert_eq!(policy.record_failure(), secs(2));
        assert_eq!(policy.record_failure(), secs(4));
        assert_eq!(policy.record_failure(), secs(8));
        assert_eq!(policy.record_failure(), None);
        assert!(policy.is_exhausted());
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn test_delay_caps_at_last_entry() {
        let mut policy = ReconnectPolicy::new(BACKOFF_SCHEDULE.to_vec(), 10);
        let delays: Vec<_> = std::iter::from_fn(|| policy.record_failure()).collect();

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 16, 16, 16, 16].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut policy = ReconnectPolicy::default();
        policy.record_failure();
        policy.record_failure();

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.record_failure(), secs(1));
    }

    #[test]
    fn test_zero_attempts_fails_immediately() {
        let mut policy = ReconnectPolicy::new(BACKOFF_SCHEDULE.to_vec(), 0);
        assert_eq!(policy.record_failure(), None);
    }
}
