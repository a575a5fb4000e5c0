//! Inbound events of a loader.

use crate::net::NetQuery;
use crate::policy::Priority;
use crate::resource::{ResourceLink, ResourceState};

use super::types::LocalFileLocation;

/// Everything that can re-enter a loader.
///
/// Events are handled one at a time, in arrival order, by the task owning
/// the loader.
#[derive(Debug)]
pub enum LoaderEvent {
    /// A dispatched query finished.
    QueryResult(NetQuery),
    /// The resource manager pushed a new grant.
    UpdateResources(ResourceState),
    /// The owner changed the transfer priority.
    UpdatePriority(Priority),
    /// The owner found (or lost) a local copy of the file.
    UpdateLocalLocation(LocalFileLocation),
    /// The owner attached a shared resource manager.
    SetResourceManager(ResourceLink),
    /// A start-part backoff delay elapsed.
    Wakeup,
    /// Stop without a terminal callback.
    Hangup,
}
