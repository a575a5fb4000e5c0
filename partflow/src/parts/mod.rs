//! Part layout and scheduling state.
//!
//! A file is split into fixed-size [`Part`]s. The engine asks a
//! [`PartTracker`] for the next schedulable part, reports completions and
//! failures back, and reads readiness and progress from it.

mod manager;
mod part;

pub use manager::{PartTracker, PartsManager, DEFAULT_MAX_PART_COUNT, DEFAULT_PART_SIZE};
pub use part::{Part, PartStatus};
