//! A loader's view of its share of the resource budget.

use std::fmt;

/// Granted budget and local usage of one loader, in bytes in flight.
///
/// The grant (`limit`) is owned by the resource manager; the loader only
/// copies it in via [`ResourceState::apply_grant`]. Usage is tracked
/// locally and fed back through the estimated limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceState {
    /// Bytes this loader would like to have in flight.
    estimated_limit: u64,
    /// Bytes this loader may have in flight.
    limit: u64,
    /// Bytes currently in flight.
    using: u64,
    /// Bytes released after their operation finished.
    used: u64,
    /// Granularity of the budget, normally the part size.
    unit_size: u64,
}

impl ResourceState {
    /// A state carrying only a grant.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn using(&self) -> u64 {
        self.using
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn estimated_limit(&self) -> u64 {
        self.estimated_limit
    }

    pub fn unit_size(&self) -> u64 {
        self.unit_size
    }

    /// Grant not yet covered by in-flight operations.
    ///
    /// Zero when a shrunk grant is below current usage.
    pub fn unused(&self) -> u64 {
        self.limit.saturating_sub(self.using)
    }

    pub fn set_unit_size(&mut self, unit_size: u64) {
        self.unit_size = unit_size;
    }

    /// Records `size` bytes going in flight.
    pub fn start_use(&mut self, size: u64) {
        self.using += size;
    }

    /// Records `size` bytes leaving flight.
    pub fn stop_use(&mut self, size: u64) {
        debug_assert!(size <= self.using, "releasing more than in use");
        self.using = self.using.saturating_sub(size);
        self.used += size;
    }

    /// Recomputes the desired limit from the bytes still to schedule.
    ///
    /// The estimate is rounded up to whole units. Returns whether it changed.
    pub fn update_estimated_limit(&mut self, extra: u64) -> bool {
        let mut estimated = self.using + extra;
        if self.unit_size > 0 {
            estimated = estimated.div_ceil(self.unit_size) * self.unit_size;
        }
        if estimated == self.estimated_limit {
            return false;
        }
        self.estimated_limit = estimated;
        true
    }

    /// Takes the grant from a state pushed by the resource manager.
    pub fn apply_grant(&mut self, other: &ResourceState) {
        self.limit = other.limit;
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[limit:{} using:{} used:{} estimated:{} unit:{}]",
            self.limit, self.using, self.used, self.estimated_limit, self.unit_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_tracking() {
        let mut state = ResourceState::with_limit(300);
        state.start_use(100);
        state.start_use(100);
        assert_eq!(state.unused(), 100);

        state.stop_use(100);
        assert_eq!(state.using(), 100);
        assert_eq!(state.used(), 100);
        assert_eq!(state.unused(), 200);
    }

    #[test]
    fn test_shrunk_grant_saturates() {
        let mut state = ResourceState::with_limit(300);
        state.start_use(300);
        state.apply_grant(&ResourceState::with_limit(100));
        assert_eq!(state.limit(), 100);
        assert_eq!(state.unused(), 0);
    }

    #[test]
    fn test_estimated_limit_rounds_to_units() {
        let mut state = ResourceState::default();
        state.set_unit_size(100);
        assert!(state.update_estimated_limit(250));
        assert_eq!(state.estimated_limit(), 300);
        assert!(!state.update_estimated_limit(300));

        state.start_use(100);
        assert!(!state.update_estimated_limit(150));
        assert_eq!(state.estimated_limit(), 300);
        assert!(state.update_estimated_limit(0));
        assert_eq!(state.estimated_limit(), 100);
    }

    #[test]
    fn test_display() {
        let state = ResourceState::with_limit(5);
        assert_eq!(
            state.to_string(),
            "[limit:5 using:0 used:0 estimated:0 unit:0]"
        );
    }
}
