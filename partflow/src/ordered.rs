//! Reorder buffer for strictly ordered delivery.
//!
//! Events arrive tagged with a sequence number in any order and leave in
//! strictly ascending order. A gap holds back everything behind it until the
//! missing sequence number is either added or skipped.
//!
//! ```text
//! add(2) add(0) add(1)          -> released: 0, 1, 2
//!        ^ next expected = 0
//! ```

use std::collections::BTreeMap;

enum Slot<T> {
    Event(T),
    Skip,
}

/// Releases events in ascending sequence order.
pub struct OrderedEventsProcessor<T> {
    /// Next sequence number to release.
    offset: u64,
    pending: BTreeMap<u64, Slot<T>>,
}

impl<T> Default for OrderedEventsProcessor<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> OrderedEventsProcessor<T> {
    /// Creates a buffer whose first expected sequence number is `offset`.
    pub fn new(offset: u64) -> Self {
        Self {
            offset,
            pending: BTreeMap::new(),
        }
    }

    /// Next sequence number that will be released.
    pub fn next_seq(&self) -> u64 {
        self.offset
    }

    /// Number of entries held back behind a gap.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is held back.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Adds an event and calls `f` for every event that became releasable.
    ///
    /// Returns `false` if `seq` was already released or is already buffered;
    /// the event is dropped in that case.
    pub fn add_with<F>(&mut self, seq: u64, event: T, f: F) -> bool
    where
        F: FnMut(u64, T),
    {
        self.insert(seq, Slot::Event(event), f)
    }

    /// Adds an event and returns everything that became releasable, in order.
    pub fn add(&mut self, seq: u64, event: T) -> Vec<(u64, T)> {
        let mut released = Vec::new();
        self.add_with(seq, event, |seq, event| released.push((seq, event)));
        released
    }

    /// Marks `seq` as consumed without an event.
    ///
    /// Used for sequence numbers that never produce a buffered event, such
    /// as parts that were already ready before the transfer started.
    pub fn skip(&mut self, seq: u64) -> Vec<(u64, T)> {
        let mut released = Vec::new();
        self.insert(seq, Slot::Skip, |seq, event| released.push((seq, event)));
        released
    }

    /// Drops all buffered events.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn insert<F>(&mut self, seq: u64, slot: Slot<T>, mut f: F) -> bool
    where
        F: FnMut(u64, T),
    {
        if seq < self.offset || self.pending.contains_key(&seq) {
            return false;
        }
        self.pending.insert(seq, slot);

        while let Some(slot) = self.pending.remove(&self.offset) {
            let seq = self.offset;
            self.offset += 1;
            if let Slot::Event(event) = slot {
                f(seq, event);
            }
        }
        true
    }
}

impl<T> std::fmt::Debug for OrderedEventsProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedEventsProcessor")
            .field("offset", &self.offset)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_in_order_releases_immediately() {
        let mut buffer = OrderedEventsProcessor::new(0);
        assert_eq!(buffer.add(0, "a"), vec![(0, "a")]);
        assert_eq!(buffer.add(1, "b"), vec![(1, "b")]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_seq(), 2);
    }

    #[test]
    fn test_gap_holds_back_successors() {
        let mut buffer = OrderedEventsProcessor::new(0);
        assert!(buffer.add(2, "c").is_empty());
        assert!(buffer.add(1, "b").is_empty());
        assert_eq!(buffer.pending_len(), 2);

        let released = buffer.add(0, "a");
        assert_eq!(released, vec![(0, "a"), (1, "b"), (2, "c")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_skip_unblocks_release() {
        let mut buffer = OrderedEventsProcessor::new(0);
        assert!(buffer.add(1, "b").is_empty());
        assert_eq!(buffer.skip(0), vec![(1, "b")]);
        assert_eq!(buffer.next_seq(), 2);
    }

    #[test]
    fn test_offset_start() {
        let mut buffer = OrderedEventsProcessor::new(3);
        assert!(buffer.add(4, 'x').is_empty());
        assert_eq!(buffer.add(3, 'w'), vec![(3, 'w'), (4, 'x')]);
    }

    #[test]
    fn test_stale_and_duplicate_rejected() {
        let mut buffer = OrderedEventsProcessor::new(0);
        buffer.add(0, 1);
        assert!(!buffer.add_with(0, 2, |_, _| panic!("stale event released")));

        assert!(buffer.add_with(5, 3, |_, _| {}));
        assert!(!buffer.add_with(5, 4, |_, _| {}));
        assert_eq!(buffer.pending_len(), 1);
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut buffer = OrderedEventsProcessor::new(0);
        buffer.add(3, ());
        buffer.add(4, ());
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_seq(), 0);
    }

    proptest! {
        #[test]
        fn prop_any_permutation_releases_in_order(
            order in Just((0u64..32).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut buffer = OrderedEventsProcessor::new(0);
            let mut released = Vec::new();
            for seq in order {
                buffer.add_with(seq, seq * 10, |seq, event| released.push((seq, event)));
            }
            let expected: Vec<_> = (0u64..32).map(|seq| (seq, seq * 10)).collect();
            prop_assert_eq!(released, expected);
            prop_assert!(buffer.is_empty());
        }
    }
}
