//! The transfer engine.
//!
//! A [`FileLoader`] drives one file transfer: it asks its part tracker for
//! parts, builds one network query per part through [`LoaderHooks`], keeps
//! in-flight bytes under the granted budget, reorders results when asked
//! to, and runs an optional integrity-check phase before reporting success.
//!
//! [`LoaderActor`] puts a loader on its own tokio task and exposes a
//! [`LoaderHandle`] for the owner.
//!
//! # Lifecycle
//!
//! ```text
//! Init ──► Dispatching ⇄ (results) ──► Checking ──► Done
//!   │            │                        │
//!   └────────────┴──── fatal error ───────┴──► Failed
//!   └────────────┴──── hangup ────────────┴──► Stopped
//! ```

mod actor;
mod engine;
mod event;
mod hooks;
mod retry;
mod types;

pub use actor::{run_all, LoaderActor, LoaderHandle, LoaderOutcome};
pub use engine::{FileLoader, LoaderStats};
pub use event::LoaderEvent;
pub use hooks::LoaderHooks;
pub use retry::PartRetryTracker;
pub use types::{
    CheckInfo, FileInfo, LoaderProgress, LoaderState, LocalFileLocation, PrefixInfo, StartedPart,
};
