//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Client read / backend connect / backend write / backend read / client write
//!     → timeouts.rs (optional deadline per operation)
//!     → on failure: backend connection torn down, request aborted
//! ```
//!
//! # Design Decisions
//! - No retries and no failover: a failed request yields no response
//! - Reconnect happens lazily on the next request routed to the backend
//! - Deadlines are injected as a policy value, never read from globals

pub mod timeouts;

pub use timeouts::{with_timeout, TimeoutPolicy};
