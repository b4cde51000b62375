//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request (type, base cost)
//!     → registry.rs (single scheduling critical section)
//!     → Apply scheduling algorithm:
//!         - virtual_finish.rs (minimize projected completion time)
//!         - round_robin.rs (rotate through backends)
//!     → backend.rs (lock the chosen backend's connection, connect lazily)
//!     → Return the locked connection to the request handler
//! ```
//!
//! # Design Decisions
//! - The backend set is fixed at startup; only connection handles come and go
//! - One scheduling lock orders every decision (read all, pick min, commit one)
//! - One connection lock per backend; I/O never happens under the scheduling lock
//! - Scheduling never fails and never depends on whether a backend is reachable

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulingStrategy;
use crate::dispatch::request::Request;

pub mod backend;
pub mod clock;
pub mod cost;
pub mod registry;
pub mod round_robin;
pub mod virtual_finish;

pub use backend::{Backend, BackendConnection};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use cost::Role;
pub use registry::{BackendRegistry, BackendSnapshot, RegistryError};
pub use round_robin::RoundRobin;
pub use virtual_finish::VirtualFinishScheduler;

/// Outcome of one scheduling call. Lives only as long as the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    /// Index into the registry's backend list.
    pub index: usize,
    /// Committed virtual finish time, for strategies that track one.
    pub virtual_finish: Option<Duration>,
}

/// A backend selection strategy.
///
/// Implementations own any mutable scheduling state and serialize access to
/// it internally. `pick` is only ever called with a non-empty backend set.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Choose a backend for `request` and commit the choice.
    fn pick(&self, request: &Request) -> ScheduleDecision;

    /// Current virtual finish time per backend, empty if not tracked.
    fn virtual_finish_times(&self) -> Vec<Duration> {
        Vec::new()
    }

    fn name(&self) -> &'static str;
}

/// Build the configured strategy for a fixed list of backend roles.
pub fn build_scheduler(
    strategy: SchedulingStrategy,
    roles: Vec<Role>,
    clock: Arc<dyn Clock>,
) -> Box<dyn LoadBalancer> {
    match strategy {
        SchedulingStrategy::VirtualFinish => Box::new(VirtualFinishScheduler::new(roles, clock)),
        SchedulingStrategy::RoundRobin => Box::new(RoundRobin::new(roles.len())),
    }
}
