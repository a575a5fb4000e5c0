//! Per-part attempt accounting for `should_restart_part`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::NetError;
use crate::policy::RetryPolicy;

/// Counts failed attempts per part against a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct PartRetryTracker {
    policy: RetryPolicy,
    attempts: HashMap<usize, u32>,
}

impl PartRetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Records a failure and decides whether the part gets another attempt.
    ///
    /// Permanent errors never do.
    pub fn should_retry(&mut self, part_id: usize, error: &NetError) -> bool {
        if !error.is_transient() {
            debug!(part_id, %error, "Permanent part failure");
            return false;
        }
        let attempts = self.attempts.entry(part_id).or_insert(1);
        let allowed = *attempts < self.policy.max_attempts();
        if allowed {
            *attempts += 1;
        }
        debug!(part_id, attempts = *attempts, allowed, %error, "Part failure");
        allowed
    }

    /// Pause before the next attempt of a part, per its failures so far.
    pub fn pause(&self, part_id: usize) -> Duration {
        match self.attempts(part_id) - 1 {
            0 => Duration::ZERO,
            failures => self.policy.backoff().pause(failures),
        }
    }

    /// Attempts made so far for a part, counting the first one.
    pub fn attempts(&self, part_id: usize) -> u32 {
        self.attempts.get(&part_id).copied().unwrap_or(1)
    }

    /// Forgets a part once it completed.
    pub fn reset(&mut self, part_id: usize) {
        self.attempts.remove(&part_id);
    }
}

impl Default for PartRetryTracker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Backoff;

    #[test]
    fn test_attempts_are_capped() {
        let mut tracker = PartRetryTracker::new(RetryPolicy::constant(3, Duration::ZERO));
        let error = NetError::Timeout(Duration::from_secs(1));

        assert!(tracker.should_retry(4, &error));
        assert!(tracker.should_retry(4, &error));
        assert!(!tracker.should_retry(4, &error));
        assert_eq!(tracker.attempts(4), 3);
        assert_eq!(tracker.attempts(5), 1);
    }

    #[test]
    fn test_parts_are_independent() {
        let mut tracker = PartRetryTracker::new(RetryPolicy::constant(2, Duration::ZERO));
        let error = NetError::remote(500, "internal");
        assert!(tracker.should_retry(0, &error));
        assert!(tracker.should_retry(1, &error));
        assert!(!tracker.should_retry(0, &error));

        tracker.reset(0);
        assert!(tracker.should_retry(0, &error));
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let mut tracker = PartRetryTracker::default();
        assert!(!tracker.should_retry(0, &NetError::remote(400, "bad offset")));
        assert_eq!(tracker.attempts(0), 1);
    }

    #[test]
    fn test_pause_follows_backoff() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(10),
            factor: 3.0,
            cap: Duration::from_secs(1),
        };
        let mut tracker = PartRetryTracker::new(RetryPolicy::new(4, backoff));
        let error = NetError::Timeout(Duration::from_secs(1));
        assert_eq!(tracker.pause(2), Duration::ZERO);

        assert!(tracker.should_retry(2, &error));
        assert_eq!(tracker.pause(2), Duration::from_millis(10));
        assert!(tracker.should_retry(2, &error));
        assert_eq!(tracker.pause(2), Duration::from_millis(30));

        tracker.reset(2);
        assert_eq!(tracker.pause(2), Duration::ZERO);
    }

    #[test]
    fn test_no_retry_policy() {
        let mut tracker = PartRetryTracker::new(RetryPolicy::never());
        assert!(!tracker.should_retry(0, &NetError::Canceled));
    }
}
