//! Virtual finish time scheduling (SERPT-style).
//!
//! For every backend `b`:
//! ```text
//! candidate(b) = max(vfinish(b), now) + multiplier(type, role(b)) * base_cost
//! ```
//! The backend with the smallest candidate wins (lowest index on ties) and
//! its virtual finish time becomes that candidate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::dispatch::request::Request;
use crate::load_balancer::clock::Clock;
use crate::load_balancer::cost::{self, Role};
use crate::load_balancer::{LoadBalancer, ScheduleDecision};

/// Minimum projected completion time selector.
#[derive(Debug)]
pub struct VirtualFinishScheduler {
    roles: Vec<Role>,
    /// Scheduling lock. Guards every backend's virtual finish time.
    finish_times: Mutex<Vec<Duration>>,
    clock: Arc<dyn Clock>,
}

impl VirtualFinishScheduler {
    pub fn new(roles: Vec<Role>, clock: Arc<dyn Clock>) -> Self {
        let finish_times = Mutex::new(vec![Duration::ZERO; roles.len()]);
        Self {
            roles,
            finish_times,
            clock,
        }
    }
}

impl LoadBalancer for VirtualFinishScheduler {
    fn pick(&self, request: &Request) -> ScheduleDecision {
        let mut finish_times = self.finish_times.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();

        // Candidates are computed once; the winner's value is committed as-is.
        let mut best: Option<(usize, Duration)> = None;
        for (index, (role, finish)) in self.roles.iter().zip(finish_times.iter()).enumerate() {
            let candidate = (*finish).max(now) + cost::service_time(request, *role);
            match best {
                Some((_, current)) if current <= candidate => {}
                _ => best = Some((index, candidate)),
            }
        }

        let (index, candidate) = best.unwrap_or((0, now));
        if let Some(slot) = finish_times.get_mut(index) {
            *slot = candidate;
        }

        ScheduleDecision {
            index,
            virtual_finish: Some(candidate),
        }
    }

    fn virtual_finish_times(&self) -> Vec<Duration> {
        self.finish_times.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn name(&self) -> &'static str {
        "virtual_finish"
    }
}
