//! Retry and priority policies.
//!
//! - [`RetryPolicy`]: how often a failed part (or a failed part start) is
//!   tried again, and how long to pause first
//! - [`Priority`]: scheduling hint forwarded to the resource manager
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use partflow::policy::{Backoff, Priority, RetryPolicy};
//!
//! let retry = RetryPolicy::exponential(3);
//! assert_eq!(retry.max_attempts(), 3);
//! assert_eq!(retry.pause_after(1), Some(Duration::from_millis(100)));
//! assert_eq!(retry.pause_after(3), None);
//!
//! let eager = RetryPolicy::new(4, Backoff::Immediate);
//! assert_eq!(eager.pause_after(2), Some(Duration::ZERO));
//!
//! assert!(Priority::INTERACTIVE > Priority::NORMAL);
//! ```

use std::time::Duration;

// =============================================================================
// Backoff Defaults
// =============================================================================

/// Attempts per part, the first one included.
pub const DEFAULT_PART_ATTEMPTS: u32 = 5;

/// First pause of an exponential backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Longest pause of an exponential backoff.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Growth of the pause per failed attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

// =============================================================================
// Priority Constants
// =============================================================================

/// Priority value for transfers a user is actively waiting on.
pub const PRIORITY_INTERACTIVE: i32 = 100;

/// Priority value for ordinary transfers.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for preloading and other background transfers.
pub const PRIORITY_BACKGROUND: i32 = -50;

// =============================================================================
// Retry Policy
// =============================================================================

/// Pause before a part is dispatched again.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    /// Dispatch again on the next loop pass.
    Immediate,
    /// The same pause after every failure.
    Constant(Duration),
    /// `base * factor^(failures - 1)`, never above `cap`.
    Exponential {
        base: Duration,
        factor: f64,
        cap: Duration,
    },
}

impl Backoff {
    /// Exponential backoff from `base` with the default factor and cap.
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            factor: DEFAULT_BACKOFF_FACTOR,
            cap: DEFAULT_BACKOFF_CAP.max(base),
        }
    }

    /// Pause after the `failures`-th consecutive failure (1-based).
    pub fn pause(&self, failures: u32) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Constant(pause) => pause,
            Self::Exponential { base, factor, cap } => {
                let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
                let scaled = base.as_nanos() as f64 * factor.powi(exponent);
                if !scaled.is_finite() || scaled >= cap.as_nanos() as f64 {
                    cap
                } else {
                    Duration::from_nanos(scaled as u64)
                }
            }
        }
    }
}

/// Attempt budget and backoff for parts that fail transiently.
///
/// The engine applies it to `start_part` failures; the transfer kinds apply
/// it to failed part results through [`PartRetryTracker`].
///
/// [`PartRetryTracker`]: crate::loader::PartRetryTracker
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_PART_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt; zero is treated as one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt; every failure is final.
    pub fn never() -> Self {
        Self::new(1, Backoff::Immediate)
    }

    /// Retries after the same pause each time.
    pub fn constant(max_attempts: u32, pause: Duration) -> Self {
        Self::new(max_attempts, Backoff::Constant(pause))
    }

    /// Exponential backoff starting at [`DEFAULT_BACKOFF_BASE`].
    pub fn exponential(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::exponential(DEFAULT_BACKOFF_BASE))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Pause before the next attempt after `failures` failed ones, or `None`
    /// once the attempt budget is spent.
    pub fn pause_after(&self, failures: u32) -> Option<Duration> {
        (failures < self.max_attempts).then(|| self.backoff.pause(failures))
    }
}

/// Transfer priority.
///
/// Higher values win when the resource manager splits its budget. The value
/// is only a hint; it never touches operations already in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    /// A user is waiting on this transfer.
    pub const INTERACTIVE: Priority = Priority(PRIORITY_INTERACTIVE);

    /// Default priority.
    pub const NORMAL: Priority = Priority(PRIORITY_NORMAL);

    /// Preloading; runs on whatever budget is left.
    pub const BACKGROUND: Priority = Priority(PRIORITY_BACKGROUND);

    /// Creates a new priority with the given value.
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the numeric priority value.
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::INTERACTIVE => write!(f, "Interactive(100)"),
            Self::NORMAL => write!(f, "Normal(0)"),
            Self::BACKGROUND => write!(f, "Background(-50)"),
            Self(v) => write!(f, "Priority({})", v),
        }
    }
}
