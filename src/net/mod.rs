//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, concurrency ceiling)
//!     → connection.rs (ID, live handler count)
//!     → Hand off to the dispatch layer
//! ```
//!
//! # Design Decisions
//! - Connections beyond the ceiling are closed at once, never queued
//! - Each handler is tracked until it finishes or is abandoned at shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Admission, ConnectionPermit, Listener, ListenerError};
