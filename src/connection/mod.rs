//! Connection admission and bookkeeping.
//!
//! The [`Registry`] is the only state shared between sessions. The
//! [`ConnectionManager`] puts it in front of the worker pool: each accepted
//! transport is admitted against the registry, then served by its own
//! [`ProtocolSession`](crate::protocol::ProtocolSession).
pub mod manager;
pub mod registry;

pub use manager::{AdmitError, ConnectionManager};
pub use registry::{ConnectionHandle, ConnectionRecord, Registry, Statistics};
