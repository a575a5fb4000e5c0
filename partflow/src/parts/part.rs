//! Part descriptor and per-part status.

use std::fmt;

/// One chunk of the file: the unit of scheduling and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Part {
    /// Index of the part; also its sequence number for ordered delivery.
    pub id: usize,
    /// Byte offset of the first byte of the part.
    pub offset: u64,
    /// Number of bytes the part covers.
    pub size: u64,
}

impl Part {
    /// Creates a part descriptor.
    pub fn new(id: usize, offset: u64, size: u64) -> Self {
        Self { id, offset, size }
    }

    /// Offset one past the last byte of the part.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part#{}[{}..{})", self.id, self.offset, self.end())
    }
}

/// Scheduling state of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    /// Not scheduled yet (or released back after a failure).
    Empty,
    /// An operation for this part is in flight.
    Pending,
    /// Confirmed transferred.
    Ready,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_end_and_display() {
        let part = Part::new(3, 300, 100);
        assert_eq!(part.end(), 400);
        assert_eq!(part.to_string(), "part#3[300..400)");
    }
}
