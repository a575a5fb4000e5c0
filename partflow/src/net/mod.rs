//! Network operation types and the transport seam.
//!
//! The engine never performs I/O itself. It builds [`NetQuery`] values,
//! hands them to a [`Transport`] together with a [`ReplyTo`] return
//! address, and later receives the finished query as an event.
//!
//! ```text
//! FileLoader ──dispatch(query, reply)──► Transport
//!     ▲                                     │
//!     └──── LoaderEvent::QueryResult ◄──────┘
//! ```

mod memory;
mod query;
mod transport;

pub use memory::MemoryTransport;
pub use query::{NetQuery, NetRequest, RequestKey};
pub use transport::{ReplyTo, Transport};
