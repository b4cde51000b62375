//! Backend registry.
//!
//! # Responsibilities
//! - Own the fixed, startup-defined backend list
//! - Run every scheduling decision through the configured strategy
//! - Hand out locked, connected backend connections
//! - Close every backend connection on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::{BackendConfig, SchedulingStrategy};
use crate::dispatch::error::DispatchError;
use crate::dispatch::request::Request;
use crate::load_balancer::{
    backend::{Backend, BackendConnection},
    build_scheduler,
    clock::{Clock, MonotonicClock},
    cost::Role,
    LoadBalancer, ScheduleDecision,
};
use crate::resilience::TimeoutPolicy;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("at least one backend is required")]
    Empty,
    #[error("backend {name:?} has invalid address {address:?}")]
    InvalidAddress { name: String, address: String },
    #[error("backend {name:?} reuses address {address}")]
    DuplicateAddress { name: String, address: SocketAddr },
}

/// Point-in-time view of one backend, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub index: usize,
    pub name: String,
    pub role: Role,
    pub address: String,
    pub connected: bool,
    pub virtual_finish_secs: Option<f64>,
    pub connects: u64,
    pub served: u64,
    pub failures: u64,
}

/// Owns all backend state. Shared across handlers via `Arc`.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
    scheduler: Box<dyn LoadBalancer>,
    timeouts: TimeoutPolicy,
}

impl BackendRegistry {
    /// Build the registry from configuration with a wall clock.
    pub fn from_config(
        configs: &[BackendConfig],
        strategy: SchedulingStrategy,
        timeouts: TimeoutPolicy,
    ) -> Result<Self, RegistryError> {
        Self::with_clock(configs, strategy, timeouts, Arc::new(MonotonicClock::new()))
    }

    /// Build the registry with an explicit time source.
    pub fn with_clock(
        configs: &[BackendConfig],
        strategy: SchedulingStrategy,
        timeouts: TimeoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RegistryError> {
        if configs.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut backends: Vec<Arc<Backend>> = Vec::with_capacity(configs.len());
        for config in configs {
            let addr: SocketAddr =
                config
                    .address
                    .parse()
                    .map_err(|_| RegistryError::InvalidAddress {
                        name: config.name.clone(),
                        address: config.address.clone(),
                    })?;
            // Failures are attributed to backends by address.
            if backends.iter().any(|b| b.addr == addr) {
                return Err(RegistryError::DuplicateAddress {
                    name: config.name.clone(),
                    address: addr,
                });
            }
            backends.push(Arc::new(Backend::new(config.name.clone(), config.role, addr)));
        }

        let roles = backends.iter().map(|b| b.role).collect();
        let scheduler = build_scheduler(strategy, roles, clock);

        tracing::info!(
            backends = backends.len(),
            strategy = scheduler.name(),
            "Backend registry initialized"
        );

        Ok(Self {
            backends,
            scheduler,
            timeouts,
        })
    }

    /// Make one scheduling decision. Never fails and performs no I/O.
    pub fn pick(&self, request: &Request) -> ScheduleDecision {
        self.scheduler.pick(request)
    }

    /// Lock the backend at `index` and make sure it has a live connection.
    ///
    /// On connect failure the lock is released and the backend stays
    /// disconnected; the next request routed here tries again.
    pub async fn ensure_connected(&self, index: usize) -> Result<BackendConnection<'_>, DispatchError> {
        let backend = self.backends.get(index).ok_or_else(|| DispatchError::BackendIo {
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such backend"),
        })?;

        let mut connection = backend.lock().await;
        connection.ensure_connected(&self.timeouts).await?;
        Ok(connection)
    }

    /// Release a backend obtained from [`ensure_connected`](Self::ensure_connected).
    pub fn release(&self, connection: BackendConnection<'_>) {
        drop(connection);
    }

    /// Close every open backend connection, waiting for in-flight use to end.
    pub async fn close_all(&self) {
        for backend in &self.backends {
            let mut connection = backend.lock().await;
            if connection.is_connected() {
                connection.teardown();
                tracing::info!(backend = %backend.name, addr = %backend.addr, "Closed backend connection");
            }
        }
    }

    pub fn backend(&self, index: usize) -> Option<&Arc<Backend>> {
        self.backends.get(index)
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    pub fn strategy_name(&self) -> &'static str {
        self.scheduler.name()
    }

    pub fn virtual_finish_times(&self) -> Vec<std::time::Duration> {
        self.scheduler.virtual_finish_times()
    }

    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        let finish_times = self.scheduler.virtual_finish_times();
        self.backends
            .iter()
            .enumerate()
            .map(|(index, b)| BackendSnapshot {
                index,
                name: b.name.clone(),
                role: b.role,
                address: b.addr.to_string(),
                connected: b.is_connected(),
                virtual_finish_secs: finish_times.get(index).map(|d| d.as_secs_f64()),
                connects: b.connect_count(),
                served: b.served_count(),
                failures: b.failure_count(),
            })
            .collect()
    }
}
