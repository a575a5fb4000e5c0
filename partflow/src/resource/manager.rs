//! Shared budget allocator for concurrently running loaders.
//!
//! Every loader registers once and keeps a [`ResourceLink`]. Whenever a
//! loader reports a new estimate (or changes priority, or leaves), the
//! manager recomputes all grants and pushes changed ones to the loaders'
//! [`GrantSink`]s.
//!
//! # Allocation
//!
//! ```text
//! total = 1000, unit = 100
//!
//! loader  priority  wants   granted
//!   A       100      400      400
//!   B         0      800      600
//!   C       -50      300        0   (budget exhausted)
//! ```
//!
//! Loaders are served by descending priority, then registration order. Each
//! gets `min(wanted, remaining)` rounded down to its unit size.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::state::ResourceState;
use crate::policy::Priority;

/// Receives grant updates pushed by the manager.
///
/// Called outside the manager's lock; implementations must not block.
pub trait GrantSink: Send + Sync {
    fn grant(&self, state: ResourceState);
}

impl<F> GrantSink for F
where
    F: Fn(ResourceState) + Send + Sync,
{
    fn grant(&self, state: ResourceState) {
        self(state)
    }
}

struct Entry {
    priority: Priority,
    estimated: u64,
    unit: u64,
    granted: u64,
    sink: Arc<dyn GrantSink>,
}

struct Inner {
    total_limit: u64,
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

type Notification = (Arc<dyn GrantSink>, ResourceState);

impl Inner {
    fn rebalance(&mut self) -> Vec<Notification> {
        let mut order: Vec<(Priority, u64)> = self
            .entries
            .iter()
            .map(|(id, entry)| (entry.priority, *id))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut remaining = self.total_limit;
        let mut notifications = Vec::new();
        for (_, id) in order {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let mut grant = entry.estimated.min(remaining);
            if entry.unit > 0 {
                grant = grant / entry.unit * entry.unit;
            }
            remaining -= grant;

            if grant != entry.granted {
                trace!(loader_id = id, old = entry.granted, new = grant, "Grant changed");
                entry.granted = grant;
                notifications.push((Arc::clone(&entry.sink), ResourceState::with_limit(grant)));
            }
        }
        notifications
    }
}

fn notify(notifications: Vec<Notification>) {
    for (sink, state) in notifications {
        sink.grant(state);
    }
}

/// Splits a fixed in-flight byte budget among registered loaders.
///
/// Cheap to clone; clones share the same budget.
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<Mutex<Inner>>,
}

impl ResourceManager {
    /// Creates a manager with `total_limit` bytes in flight to share.
    pub fn new(total_limit: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                total_limit,
                next_id: 1,
                entries: BTreeMap::new(),
            })),
        }
    }

    pub fn total_limit(&self) -> u64 {
        self.inner.lock().total_limit
    }

    /// Changes the shared budget and redistributes it.
    pub fn set_total_limit(&self, total_limit: u64) {
        let notifications = {
            let mut inner = self.inner.lock();
            inner.total_limit = total_limit;
            inner.rebalance()
        };
        debug!(total_limit, "Resource budget changed");
        notify(notifications);
    }

    /// Registers a loader. Its grant starts at zero until it reports.
    pub fn register(&self, priority: Priority, sink: Arc<dyn GrantSink>) -> ResourceLink {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                priority,
                estimated: 0,
                unit: 0,
                granted: 0,
                sink,
            },
        );
        debug!(loader_id = id, %priority, "Loader registered");
        ResourceLink {
            id,
            manager: Arc::downgrade(&self.inner),
            released: false,
        }
    }

    /// Current grant of a registered loader.
    pub fn granted(&self, loader_id: u64) -> Option<u64> {
        self.inner.lock().entries.get(&loader_id).map(|e| e.granted)
    }

    /// Sum of all current grants.
    pub fn total_granted(&self) -> u64 {
        self.inner.lock().entries.values().map(|e| e.granted).sum()
    }

    /// Number of registered loaders.
    pub fn loader_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResourceManager")
            .field("total_limit", &inner.total_limit)
            .field("loaders", &inner.entries.len())
            .finish()
    }
}

/// A loader's registration with a [`ResourceManager`].
///
/// Releasing (explicitly or on drop) returns the grant to the pool exactly
/// once.
pub struct ResourceLink {
    id: u64,
    manager: Weak<Mutex<Inner>>,
    released: bool,
}

impl ResourceLink {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Entry),
    {
        if self.released {
            return false;
        }
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        let notifications = {
            let mut inner = inner.lock();
            let Some(entry) = inner.entries.get_mut(&self.id) else {
                return false;
            };
            f(entry);
            inner.rebalance()
        };
        notify(notifications);
        true
    }

    /// Reports the loader's desired limit. Returns `false` if the manager is gone.
    pub fn report(&self, state: &ResourceState) -> bool {
        let estimated = state.estimated_limit();
        let unit = state.unit_size();
        self.update(|entry| {
            entry.estimated = estimated;
            entry.unit = unit;
        })
    }

    /// Forwards a priority hint.
    pub fn set_priority(&self, priority: Priority) -> bool {
        self.update(|entry| entry.priority = priority)
    }

    /// Returns the grant to the pool. Idempotent.
    pub fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let notifications = {
            let mut inner = inner.lock();
            inner.entries.remove(&self.id);
            inner.rebalance()
        };
        debug!(loader_id = self.id, "Loader released its grant");
        notify(notifications);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for ResourceLink {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ResourceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLink")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Grants = Arc<Mutex<Vec<u64>>>;

    fn recording_sink() -> (Arc<dyn GrantSink>, Grants) {
        let grants: Grants = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&grants);
        let sink: Arc<dyn GrantSink> =
            Arc::new(move |state: ResourceState| recorded.lock().push(state.limit()));
        (sink, grants)
    }

    fn wanting(estimated: u64, unit: u64) -> ResourceState {
        let mut state = ResourceState::default();
        state.set_unit_size(unit);
        state.update_estimated_limit(estimated);
        state
    }

    #[test]
    fn test_single_loader_capped_by_total() {
        let manager = ResourceManager::new(1000);
        let (sink, grants) = recording_sink();
        let link = manager.register(Priority::NORMAL, sink);

        assert!(link.report(&wanting(5000, 100)));
        assert_eq!(manager.granted(link.id()), Some(1000));
        assert_eq!(*grants.lock(), vec![1000]);
    }

    #[test]
    fn test_priority_wins() {
        let manager = ResourceManager::new(1000);
        let (low_sink, _) = recording_sink();
        let (high_sink, _) = recording_sink();
        let low = manager.register(Priority::BACKGROUND, low_sink);
        let high = manager.register(Priority::INTERACTIVE, high_sink);

        low.report(&wanting(800, 100));
        assert_eq!(manager.granted(low.id()), Some(800));

        high.report(&wanting(400, 100));
        assert_eq!(manager.granted(high.id()), Some(400));
        assert_eq!(manager.granted(low.id()), Some(600));
        assert!(manager.total_granted() <= manager.total_limit());
    }

    #[test]
    fn test_grant_rounded_to_units() {
        let manager = ResourceManager::new(250);
        let (sink, _) = recording_sink();
        let link = manager.register(Priority::NORMAL, sink);
        link.report(&wanting(1000, 100));
        assert_eq!(manager.granted(link.id()), Some(200));
    }

    #[test]
    fn test_release_redistributes_once() {
        let manager = ResourceManager::new(500);
        let (first_sink, _) = recording_sink();
        let (second_sink, second_grants) = recording_sink();
        let mut first = manager.register(Priority::INTERACTIVE, first_sink);
        let second = manager.register(Priority::NORMAL, second_sink);

        first.report(&wanting(500, 100));
        second.report(&wanting(500, 100));
        assert_eq!(manager.granted(second.id()), Some(0));

        first.release();
        first.release();
        assert!(first.is_released());
        assert_eq!(manager.loader_count(), 1);
        assert_eq!(manager.granted(second.id()), Some(500));
        assert_eq!(*second_grants.lock(), vec![500]);
        assert!(!first.report(&wanting(100, 100)));
    }

    #[test]
    fn test_drop_releases() {
        let manager = ResourceManager::new(500);
        let (sink, _) = recording_sink();
        let link = manager.register(Priority::NORMAL, sink);
        drop(link);
        assert_eq!(manager.loader_count(), 0);
    }

    #[test]
    fn test_priority_change_rebalances() {
        let manager = ResourceManager::new(300);
        let (a_sink, _) = recording_sink();
        let (b_sink, _) = recording_sink();
        let a = manager.register(Priority::NORMAL, a_sink);
        let b = manager.register(Priority::NORMAL, b_sink);
        a.report(&wanting(300, 100));
        b.report(&wanting(300, 100));
        assert_eq!(manager.granted(a.id()), Some(300));

        b.set_priority(Priority::INTERACTIVE);
        assert_eq!(manager.granted(b.id()), Some(300));
        assert_eq!(manager.granted(a.id()), Some(0));
    }

    #[test]
    fn test_shrinking_total() {
        let manager = ResourceManager::new(1000);
        let (sink, grants) = recording_sink();
        let link = manager.register(Priority::NORMAL, sink);
        link.report(&wanting(1000, 100));
        manager.set_total_limit(200);
        assert_eq!(*grants.lock(), vec![1000, 200]);
    }

    #[test]
    fn test_manager_gone() {
        let manager = ResourceManager::new(100);
        let (sink, _) = recording_sink();
        let mut link = manager.register(Priority::NORMAL, sink);
        drop(manager);
        assert!(!link.report(&wanting(100, 100)));
        link.release();
    }
}
