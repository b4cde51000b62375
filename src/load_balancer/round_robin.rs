//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dispatch::request::Request;
use crate::load_balancer::{LoadBalancer, ScheduleDecision};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends, ignoring cost.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
    len: usize,
}

impl RoundRobin {
    pub fn new(len: usize) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            len,
        }
    }
}

impl LoadBalancer for RoundRobin {
    fn pick(&self, _request: &Request) -> ScheduleDecision {
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        ScheduleDecision {
            index: ticket.checked_rem(self.len).unwrap_or(0),
            virtual_finish: None,
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
