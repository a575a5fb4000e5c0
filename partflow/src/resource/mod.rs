//! Shared in-flight budget.
//!
//! Each loader keeps a [`ResourceState`] (its grant and local usage). When a
//! [`ResourceManager`] is attached, the loader reports its desired limit
//! through a [`ResourceLink`] and receives grants back as events.

mod manager;
mod state;

pub use manager::{GrantSink, ResourceLink, ResourceManager};
pub use state::ResourceState;
