//! Part bookkeeping for a single transfer.
//!
//! The [`PartTracker`] trait is the engine's view of which parts are empty,
//! in flight, or ready. [`PartsManager`] is the implementation shipped with
//! the crate; it also handles files whose size is only discovered while the
//! transfer runs.

use tracing::{debug, trace};

use super::part::{Part, PartStatus};
use crate::error::{LoaderError, LoaderResult};
use crate::loader::FileInfo;

/// Default cap on the number of parts of one file.
pub const DEFAULT_MAX_PART_COUNT: usize = 4000;

/// Smallest part size picked when `FileInfo::part_size` is zero.
pub const DEFAULT_PART_SIZE: u64 = 128 * 1024;

/// Granularity of automatically picked part sizes.
const PART_SIZE_ALIGN: u64 = 1024;

/// Scheduling state the engine needs from a part tracker.
pub trait PartTracker: Send {
    /// Sets up the part layout. Must be called once before anything else.
    fn configure(&mut self, info: &FileInfo) -> LoaderResult<()>;

    /// Takes the next schedulable part and marks it in flight.
    ///
    /// Returns `Ok(None)` when every part is in flight or ready.
    fn start_part(&mut self) -> LoaderResult<Option<Part>>;

    /// Confirms a part with the number of bytes actually transferred.
    fn on_part_ok(&mut self, part: Part, actual_size: u64) -> LoaderResult<()>;

    /// Releases an in-flight part back to the schedulable pool.
    fn on_part_failed(&mut self, part_id: usize);

    /// Marks every part inside a confirmed prefix as ready.
    ///
    /// Returns the ids that changed state.
    fn set_known_prefix(&mut self, size: u64, is_ready: bool) -> LoaderResult<Vec<usize>>;

    /// Whether every byte has been transferred.
    fn is_fully_ready(&self) -> bool;

    /// Whether the transfer may complete: fully ready and checked if needed.
    fn ready(&self) -> bool;

    /// Final validation before reporting success.
    fn finish(&mut self) -> LoaderResult<()>;

    /// Ids of parts currently ready.
    fn ready_part_ids(&self) -> Vec<usize>;

    fn part_count(&self) -> usize;
    fn part_size(&self) -> u64;
    fn ready_count(&self) -> usize;
    fn ready_size(&self) -> u64;

    /// Number of leading parts that are ready.
    fn ready_prefix_count(&self) -> usize;

    /// Size of the ready prefix, verified or not.
    fn unchecked_ready_prefix_size(&self) -> u64;

    fn checked_prefix_size(&self) -> u64;
    fn set_checked_prefix_size(&mut self, size: u64);
    fn set_need_check(&mut self, need_check: bool);

    /// Bytes not yet scheduled; the basis of the engine's budget estimate.
    fn estimated_extra(&self) -> u64;

    /// Final size, if known.
    fn size(&self) -> Option<u64>;
}

/// Default part tracker.
#[derive(Debug)]
pub struct PartsManager {
    max_part_count: usize,
    use_part_count_limit: bool,
    part_size: u64,
    /// Final size; meaningful only when `size_final` is set.
    size: u64,
    expected_size: u64,
    size_final: bool,
    /// Smallest end of file implied by a short reply while the size is open.
    size_bound: Option<u64>,
    /// One past the last byte confirmed by any ready part.
    data_end: u64,
    parts: Vec<PartStatus>,
    first_empty: usize,
    ready_prefix: usize,
    pending_count: usize,
    ready_count: usize,
    ready_size: u64,
    need_check: bool,
    checked_prefix_size: u64,
}

impl Default for PartsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PartsManager {
    /// Creates an unconfigured tracker with the default part-count cap.
    pub fn new() -> Self {
        Self::with_max_part_count(DEFAULT_MAX_PART_COUNT)
    }

    /// Creates an unconfigured tracker with a custom part-count cap.
    pub fn with_max_part_count(max_part_count: usize) -> Self {
        Self {
            max_part_count: max_part_count.max(1),
            use_part_count_limit: true,
            part_size: 0,
            size: 0,
            expected_size: 0,
            size_final: false,
            size_bound: None,
            data_end: 0,
            parts: Vec::new(),
            first_empty: 0,
            ready_prefix: 0,
            pending_count: 0,
            ready_count: 0,
            ready_size: 0,
            need_check: false,
            checked_prefix_size: 0,
        }
    }

    /// Number of parts currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Status of a part, if it exists.
    pub fn status(&self, part_id: usize) -> Option<PartStatus> {
        self.parts.get(part_id).copied()
    }

    fn pick_part_size(&self, size: u64) -> u64 {
        let min_for_cap = size.div_ceil(self.max_part_count as u64);
        let aligned = min_for_cap.div_ceil(PART_SIZE_ALIGN) * PART_SIZE_ALIGN;
        aligned.max(DEFAULT_PART_SIZE)
    }

    fn part_len(&self, part_id: usize) -> u64 {
        let offset = part_id as u64 * self.part_size;
        if self.size_final {
            self.size.saturating_sub(offset).min(self.part_size)
        } else {
            self.part_size
        }
    }

    fn part(&self, part_id: usize) -> Part {
        Part::new(
            part_id,
            part_id as u64 * self.part_size,
            self.part_len(part_id),
        )
    }

    fn can_grow(&self) -> bool {
        !self.size_final
            && self.size_bound.is_none()
            && (!self.use_part_count_limit || self.parts.len() < self.max_part_count)
    }

    /// Whether a part starts before the end of file known so far.
    fn in_bounds(&self, part_id: usize) -> bool {
        let offset = part_id as u64 * self.part_size;
        match self.size_bound {
            Some(bound) if !self.size_final => offset < bound,
            _ => true,
        }
    }

    fn mark_ready(&mut self, part_id: usize, bytes: u64) {
        self.parts[part_id] = PartStatus::Ready;
        self.ready_count += 1;
        self.ready_size += bytes;
        if bytes > 0 {
            self.data_end = self.data_end.max(part_id as u64 * self.part_size + bytes);
        }
        while self.ready_prefix < self.parts.len()
            && self.parts[self.ready_prefix] == PartStatus::Ready
        {
            self.ready_prefix += 1;
        }
    }

    /// Narrows the end of file after a reply that ended at `end`.
    ///
    /// A short reply only proves the file ends at or before its end; an
    /// empty one may come from a part scheduled past the real end.
    fn check_bound(&mut self, part: Part, end: u64, short: bool) -> LoaderResult<()> {
        let bound = match (self.size_bound, short) {
            (Some(bound), true) => bound.min(end),
            (None, true) => end,
            (Some(bound), false) => bound,
            (None, false) => return Ok(()),
        };
        let data_end = if end > part.offset {
            self.data_end.max(end)
        } else {
            self.data_end
        };
        if data_end > bound {
            return Err(LoaderError::SizeConflict {
                part_id: part.id,
                size: bound,
                end: data_end,
            });
        }
        if short && self.size_bound != Some(bound) {
            trace!(part_id = part.id, bound, "End of file narrowed");
            self.size_bound = Some(bound);
        }
        Ok(())
    }

    /// Fixes the size once every part before the bound is ready.
    fn try_finalize_size(&mut self) {
        if self.size_final {
            return;
        }
        let Some(bound) = self.size_bound else {
            return;
        };
        if self.ready_prefix as u64 * self.part_size >= bound {
            self.finalize_size(bound);
        }
    }

    fn finalize_size(&mut self, size: u64) {
        self.size = size;
        self.size_final = true;
        let part_count = size.div_ceil(self.part_size) as usize;
        if self.parts.len() > part_count {
            // Everything past the end is in flight or confirmed empty.
            for status in self.parts.drain(part_count..) {
                match status {
                    PartStatus::Pending => self.pending_count -= 1,
                    PartStatus::Ready => self.ready_count -= 1,
                    PartStatus::Empty => {}
                }
            }
            self.ready_prefix = self.ready_prefix.min(part_count);
            self.first_empty = self.first_empty.min(part_count);
        }
        debug!(size, part_count, "File size is final");
    }
}

impl PartTracker for PartsManager {
    fn configure(&mut self, info: &FileInfo) -> LoaderResult<()> {
        let known_size = info.known_size();
        if info.is_size_final && known_size.is_none() {
            return Err(LoaderError::InvalidFileInfo(format!(
                "final size must not be negative, got {}",
                info.size
            )));
        }

        self.use_part_count_limit = info.use_part_count_limit;
        self.size_final = info.is_size_final;
        self.size = known_size.unwrap_or(0);
        self.expected_size = known_size
            .unwrap_or(0)
            .max(info.expected_size.max(0) as u64);

        self.part_size = if info.part_size == 0 {
            self.pick_part_size(self.expected_size)
        } else {
            info.part_size
        };

        let part_count = self.expected_size.div_ceil(self.part_size) as usize;
        if self.use_part_count_limit && part_count > self.max_part_count {
            return Err(LoaderError::TooManyParts {
                count: part_count,
                max: self.max_part_count,
            });
        }
        self.parts = vec![PartStatus::Empty; part_count];

        for &part_id in &info.ready_parts {
            if part_id >= part_count {
                return Err(LoaderError::InvalidFileInfo(format!(
                    "ready part {} out of range (part count {})",
                    part_id, part_count
                )));
            }
            if self.parts[part_id] != PartStatus::Ready {
                let bytes = self.part_len(part_id);
                self.mark_ready(part_id, bytes);
            }
        }

        debug!(
            size = self.size,
            expected_size = self.expected_size,
            size_final = self.size_final,
            part_size = self.part_size,
            part_count,
            ready_count = self.ready_count,
            "Parts configured"
        );
        Ok(())
    }

    fn start_part(&mut self) -> LoaderResult<Option<Part>> {
        while self.first_empty < self.parts.len()
            && self.parts[self.first_empty] != PartStatus::Empty
        {
            self.first_empty += 1;
        }

        if !self.in_bounds(self.first_empty) {
            // Past a short reply; wait for the parts before it.
            return Ok(None);
        }
        if self.first_empty >= self.parts.len() {
            if self.size_final {
                return Ok(None);
            }
            if !self.can_grow() {
                return Err(LoaderError::TooManyParts {
                    count: self.parts.len() + 1,
                    max: self.max_part_count,
                });
            }
            self.parts.push(PartStatus::Empty);
        }

        let part_id = self.first_empty;
        self.parts[part_id] = PartStatus::Pending;
        self.pending_count += 1;
        self.first_empty += 1;
        Ok(Some(self.part(part_id)))
    }

    fn on_part_ok(&mut self, part: Part, actual_size: u64) -> LoaderResult<()> {
        match self.parts.get(part.id) {
            Some(PartStatus::Pending) => {}
            Some(PartStatus::Ready) => {
                // Covered by a resume prefix while in flight.
                self.pending_count = self.pending_count.saturating_sub(1);
                trace!(part_id = part.id, "Part already ready");
                return Ok(());
            }
            Some(PartStatus::Empty) | None => {
                if actual_size == 0 {
                    // Scheduled past the end before the size became final.
                    return Ok(());
                }
                return Err(LoaderError::InvalidPartSize {
                    part_id: part.id,
                    expected: 0,
                    actual: actual_size,
                });
            }
        }

        if actual_size > part.size {
            return Err(LoaderError::InvalidPartSize {
                part_id: part.id,
                expected: part.size,
                actual: actual_size,
            });
        }

        let short = actual_size < part.size;
        if short && self.size_final {
            return Err(LoaderError::InvalidPartSize {
                part_id: part.id,
                expected: part.size,
                actual: actual_size,
            });
        }
        self.check_bound(part, part.offset + actual_size, short)?;

        self.pending_count -= 1;
        self.mark_ready(part.id, actual_size);
        self.try_finalize_size();
        Ok(())
    }

    fn on_part_failed(&mut self, part_id: usize) {
        if let Some(status) = self.parts.get_mut(part_id) {
            if *status == PartStatus::Pending {
                *status = PartStatus::Empty;
                self.pending_count -= 1;
                self.first_empty = self.first_empty.min(part_id);
            }
        }
    }

    fn set_known_prefix(&mut self, size: u64, is_ready: bool) -> LoaderResult<Vec<usize>> {
        if !is_ready {
            return Ok(Vec::new());
        }
        let end = if self.size_final {
            Some(self.size)
        } else {
            self.size_bound
        };
        if let Some(end) = end.filter(|end| size > *end) {
            return Err(LoaderError::InvalidFileInfo(format!(
                "local prefix {} exceeds file size {}",
                size, end
            )));
        }

        let covered = (size / self.part_size) as usize;
        if covered > self.parts.len() {
            if self.use_part_count_limit && covered > self.max_part_count {
                return Err(LoaderError::TooManyParts {
                    count: covered,
                    max: self.max_part_count,
                });
            }
            self.parts.resize(covered, PartStatus::Empty);
        }

        let mut changed = Vec::new();
        for part_id in 0..covered {
            if self.parts[part_id] == PartStatus::Empty {
                let bytes = self.part_len(part_id);
                self.mark_ready(part_id, bytes);
                changed.push(part_id);
            }
        }
        // The tail part counts when the prefix reaches the end of the file.
        if self.size_final && size == self.size && covered < self.parts.len() {
            let tail = self.parts.len() - 1;
            if self.parts[tail] == PartStatus::Empty {
                let bytes = self.part_len(tail);
                self.mark_ready(tail, bytes);
                changed.push(tail);
            }
        }
        self.try_finalize_size();
        Ok(changed)
    }

    fn is_fully_ready(&self) -> bool {
        self.size_final && self.ready_count == self.parts.len()
    }

    fn ready(&self) -> bool {
        self.is_fully_ready() && (!self.need_check || self.checked_prefix_size >= self.size)
    }

    fn finish(&mut self) -> LoaderResult<()> {
        if !self.ready() {
            return Err(LoaderError::Fatal(format!(
                "transfer finished with {} of {} parts ready",
                self.ready_count,
                self.parts.len()
            )));
        }
        if self.ready_size != self.size {
            return Err(LoaderError::Fatal(format!(
                "transfer finished with {} of {} bytes ready",
                self.ready_size, self.size
            )));
        }
        Ok(())
    }

    fn ready_part_ids(&self) -> Vec<usize> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, status)| **status == PartStatus::Ready)
            .map(|(id, _)| id)
            .collect()
    }

    fn part_count(&self) -> usize {
        self.parts.len()
    }

    fn part_size(&self) -> u64 {
        self.part_size
    }

    fn ready_count(&self) -> usize {
        self.ready_count
    }

    fn ready_size(&self) -> u64 {
        self.ready_size
    }

    fn ready_prefix_count(&self) -> usize {
        self.ready_prefix
    }

    fn unchecked_ready_prefix_size(&self) -> u64 {
        let prefix = self.ready_prefix as u64 * self.part_size;
        if self.size_final {
            prefix.min(self.size)
        } else {
            prefix
        }
    }

    fn checked_prefix_size(&self) -> u64 {
        self.checked_prefix_size
    }

    fn set_checked_prefix_size(&mut self, size: u64) {
        self.checked_prefix_size = size;
    }

    fn set_need_check(&mut self, need_check: bool) {
        self.need_check = need_check;
    }

    fn estimated_extra(&self) -> u64 {
        let empty: u64 = self
            .parts
            .iter()
            .enumerate()
            .filter(|(id, status)| **status == PartStatus::Empty && self.in_bounds(*id))
            .map(|(id, _)| self.part_len(id))
            .sum();
        if self.can_grow() {
            empty + self.part_size
        } else {
            empty
        }
    }

    fn size(&self) -> Option<u64> {
        self.size_final.then_some(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(size: i64, part_size: u64, ready_parts: Vec<usize>) -> PartsManager {
        let mut manager = PartsManager::new();
        manager
            .configure(&FileInfo::new(size, part_size).with_ready_parts(ready_parts))
            .unwrap();
        manager
    }

    #[test]
    fn test_configure_known_size() {
        let manager = configured(1000, 100, vec![]);
        assert_eq!(manager.part_count(), 10);
        assert_eq!(manager.part_size(), 100);
        assert_eq!(manager.size(), Some(1000));
        assert!(!manager.is_fully_ready());
        assert_eq!(manager.estimated_extra(), 1000);
    }

    #[test]
    fn test_last_part_is_short() {
        let mut manager = configured(250, 100, vec![]);
        let parts: Vec<_> = std::iter::from_fn(|| manager.start_part().unwrap()).collect();
        assert_eq!(
            parts,
            vec![
                Part::new(0, 0, 100),
                Part::new(1, 100, 100),
                Part::new(2, 200, 50)
            ]
        );
    }

    #[test]
    fn test_full_cycle_becomes_ready() {
        let mut manager = configured(300, 100, vec![]);
        while let Some(part) = manager.start_part().unwrap() {
            manager.on_part_ok(part, part.size).unwrap();
        }
        assert!(manager.is_fully_ready());
        assert!(manager.ready());
        assert_eq!(manager.ready_size(), 300);
        assert_eq!(manager.ready_prefix_count(), 3);
        manager.finish().unwrap();
    }

    #[test]
    fn test_failed_part_is_rescheduled_first() {
        let mut manager = configured(300, 100, vec![]);
        let first = manager.start_part().unwrap().unwrap();
        let second = manager.start_part().unwrap().unwrap();
        assert_eq!(manager.pending_count(), 2);

        manager.on_part_failed(first.id);
        assert_eq!(manager.status(first.id), Some(PartStatus::Empty));
        assert_eq!(manager.start_part().unwrap(), Some(first));
        assert_ne!(first, second);
    }

    #[test]
    fn test_ready_parts_are_skipped() {
        let mut manager = configured(400, 100, vec![0, 2]);
        assert_eq!(manager.ready_count(), 2);
        assert_eq!(manager.ready_size(), 200);
        assert_eq!(manager.ready_prefix_count(), 1);
        assert_eq!(manager.start_part().unwrap().map(|p| p.id), Some(1));
        assert_eq!(manager.start_part().unwrap().map(|p| p.id), Some(3));
        assert_eq!(manager.start_part().unwrap(), None);
    }

    #[test]
    fn test_ready_part_out_of_range() {
        let mut manager = PartsManager::new();
        let result = manager.configure(&FileInfo::new(100, 100).with_ready_parts(vec![5]));
        assert!(matches!(result, Err(LoaderError::InvalidFileInfo(_))));
    }

    #[test]
    fn test_part_count_limit() {
        let mut manager = PartsManager::with_max_part_count(5);
        let result = manager.configure(&FileInfo::new(1000, 100));
        assert!(matches!(
            result,
            Err(LoaderError::TooManyParts { count: 10, max: 5 })
        ));

        let mut manager = PartsManager::with_max_part_count(5);
        manager
            .configure(&FileInfo::new(1000, 100).without_part_count_limit())
            .unwrap();
        assert_eq!(manager.part_count(), 10);
    }

    #[test]
    fn test_auto_part_size() {
        let mut manager = PartsManager::with_max_part_count(10);
        manager.configure(&FileInfo::new(10 * 1024 * 1024, 0)).unwrap();
        assert_eq!(manager.part_size(), 1024 * 1024);
        assert!(manager.part_count() <= 10);

        let mut manager = PartsManager::new();
        manager.configure(&FileInfo::new(1000, 0)).unwrap();
        assert_eq!(manager.part_size(), DEFAULT_PART_SIZE);
        assert_eq!(manager.part_count(), 1);
    }

    #[test]
    fn test_wrong_size_for_known_file() {
        let mut manager = configured(300, 100, vec![]);
        let part = manager.start_part().unwrap().unwrap();
        let result = manager.on_part_ok(part, 40);
        assert!(matches!(
            result,
            Err(LoaderError::InvalidPartSize { actual: 40, .. })
        ));
    }

    #[test]
    fn test_unknown_size_is_discovered() {
        let mut manager = PartsManager::new();
        manager.configure(&FileInfo::unknown_size(0, 100)).unwrap();
        assert_eq!(manager.part_count(), 0);
        assert_eq!(manager.size(), None);
        assert_eq!(manager.estimated_extra(), 100);

        let first = manager.start_part().unwrap().unwrap();
        let second = manager.start_part().unwrap().unwrap();
        let third = manager.start_part().unwrap().unwrap();
        assert_eq!(third.offset, 200);

        manager.on_part_ok(first, 100).unwrap();
        manager.on_part_ok(second, 30).unwrap();
        assert_eq!(manager.size(), Some(130));
        assert_eq!(manager.part_count(), 2);

        // Scheduled past the end; completes empty.
        manager.on_part_ok(third, 0).unwrap();
        assert!(manager.is_fully_ready());
        assert_eq!(manager.ready_size(), 130);
        assert_eq!(manager.pending_count(), 0);
    }

    fn unknown(part_size: u64) -> PartsManager {
        let mut manager = PartsManager::new();
        manager
            .configure(&FileInfo::unknown_size(0, part_size))
            .unwrap();
        manager
    }

    #[test]
    fn test_short_part_before_earlier_parts() {
        let mut manager = unknown(100);
        let parts: Vec<_> = (0..4).map(|_| manager.start_part().unwrap().unwrap()).collect();

        manager.on_part_ok(parts[1], 30).unwrap();
        assert_eq!(manager.size(), None);
        // Nothing past the short part is scheduled while part 0 is out.
        assert_eq!(manager.start_part().unwrap(), None);
        assert_eq!(manager.estimated_extra(), 0);

        manager.on_part_ok(parts[0], 100).unwrap();
        assert_eq!(manager.size(), Some(130));
        assert_eq!(manager.part_count(), 2);
        assert_eq!(manager.start_part().unwrap(), None);
        assert!(manager.is_fully_ready());

        manager.on_part_ok(parts[3], 0).unwrap();
        manager.on_part_ok(parts[2], 0).unwrap();
        assert_eq!(manager.ready_size(), 130);
        assert_eq!(manager.pending_count(), 0);
        manager.finish().unwrap();
    }

    #[test]
    fn test_empty_reply_past_the_end_only_bounds_size() {
        let mut manager = unknown(100);
        let parts: Vec<_> = (0..4).map(|_| manager.start_part().unwrap().unwrap()).collect();

        manager.on_part_ok(parts[3], 0).unwrap();
        assert_eq!(manager.size(), None);

        manager.on_part_ok(parts[2], 50).unwrap();
        assert_eq!(manager.size(), None);
        manager.on_part_ok(parts[1], 100).unwrap();
        manager.on_part_ok(parts[0], 100).unwrap();

        assert_eq!(manager.size(), Some(250));
        assert_eq!(manager.part_count(), 3);
        assert_eq!(manager.ready_count(), 3);
        assert_eq!(manager.ready_size(), 250);
        assert_eq!(manager.ready_prefix_count(), 3);
        manager.finish().unwrap();
    }

    #[test]
    fn test_failed_part_below_bound_is_rescheduled() {
        let mut manager = unknown(100);
        let parts: Vec<_> = (0..3).map(|_| manager.start_part().unwrap().unwrap()).collect();

        manager.on_part_ok(parts[2], 10).unwrap();
        manager.on_part_failed(parts[0].id);
        assert_eq!(manager.start_part().unwrap(), Some(parts[0]));
        assert_eq!(manager.start_part().unwrap(), None);

        manager.on_part_ok(parts[0], 100).unwrap();
        manager.on_part_ok(parts[1], 100).unwrap();
        assert_eq!(manager.size(), Some(210));
    }

    #[test]
    fn test_data_past_discovered_end_conflicts() {
        let mut manager = unknown(100);
        let parts: Vec<_> = (0..3).map(|_| manager.start_part().unwrap().unwrap()).collect();

        manager.on_part_ok(parts[2], 40).unwrap();
        let result = manager.on_part_ok(parts[1], 20);
        assert!(matches!(
            result,
            Err(LoaderError::SizeConflict {
                part_id: 1,
                size: 120,
                end: 240
            })
        ));
    }

    #[test]
    fn test_prefix_past_bound_rejected() {
        let mut manager = unknown(100);
        let parts: Vec<_> = (0..2).map(|_| manager.start_part().unwrap().unwrap()).collect();
        manager.on_part_ok(parts[1], 0).unwrap();
        assert!(manager.set_known_prefix(200, true).is_err());

        manager.on_part_failed(parts[0].id);
        assert_eq!(manager.set_known_prefix(100, true).unwrap(), vec![0]);
        assert_eq!(manager.size(), Some(100));
        assert_eq!(manager.ready_size(), 100);
        assert!(manager.is_fully_ready());
    }

    #[test]
    fn test_unknown_size_growth_is_capped() {
        let mut manager = PartsManager::with_max_part_count(2);
        manager.configure(&FileInfo::unknown_size(0, 100)).unwrap();
        manager.start_part().unwrap();
        manager.start_part().unwrap();
        assert!(matches!(
            manager.start_part(),
            Err(LoaderError::TooManyParts { .. })
        ));
    }

    #[test]
    fn test_known_prefix_marks_parts_ready() {
        let mut manager = configured(1000, 100, vec![]);
        let changed = manager.set_known_prefix(300, true).unwrap();
        assert_eq!(changed, vec![0, 1, 2]);
        assert_eq!(manager.ready_size(), 300);
        assert_eq!(manager.unchecked_ready_prefix_size(), 300);
        assert_eq!(manager.start_part().unwrap().map(|p| p.offset), Some(300));
    }

    #[test]
    fn test_partial_part_in_prefix_is_not_ready() {
        let mut manager = configured(1000, 100, vec![]);
        let changed = manager.set_known_prefix(250, true).unwrap();
        assert_eq!(changed, vec![0, 1]);
    }

    #[test]
    fn test_untrusted_prefix_is_ignored() {
        let mut manager = configured(1000, 100, vec![]);
        assert!(manager.set_known_prefix(500, false).unwrap().is_empty());
        assert_eq!(manager.ready_count(), 0);
    }

    #[test]
    fn test_full_prefix_covers_short_tail() {
        let mut manager = configured(250, 100, vec![]);
        let changed = manager.set_known_prefix(250, true).unwrap();
        assert_eq!(changed, vec![0, 1, 2]);
        assert!(manager.is_fully_ready());
    }

    #[test]
    fn test_prefix_beyond_size_rejected() {
        let mut manager = configured(200, 100, vec![]);
        assert!(manager.set_known_prefix(300, true).is_err());
    }

    #[test]
    fn test_need_check_gates_ready() {
        let mut manager = configured(200, 100, vec![0, 1]);
        assert!(manager.ready());

        manager.set_need_check(true);
        manager.set_checked_prefix_size(100);
        assert!(manager.is_fully_ready());
        assert!(!manager.ready());
        assert!(manager.finish().is_err());

        manager.set_checked_prefix_size(200);
        assert!(manager.ready());
    }

    #[test]
    fn test_empty_file_is_ready() {
        let manager = configured(0, 100, vec![]);
        assert_eq!(manager.part_count(), 0);
        assert!(manager.ready());
    }
}
