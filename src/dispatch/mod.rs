//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted client connection
//!     → server.rs (spawn supervised handler task)
//!     → handler.rs (read + validate 2 bytes via request.rs)
//!     → load_balancer (pick backend, lock + connect)
//!     → backend exchange (forward 2 bytes, single ≤1024-byte read)
//!     → response.rs (relay verbatim)
//!     → close client
//! ```
//!
//! # Design Decisions
//! - Silent drop on any failure: the protocol has no error message
//! - No retries, no failover to a different backend
//! - Errors are values (error.rs); the server loop logs them

pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use error::DispatchError;
pub use handler::{handle_client, Dispatched};
pub use request::{BaseCost, ProtocolError, Request, RequestType};
pub use server::DispatchServer;
