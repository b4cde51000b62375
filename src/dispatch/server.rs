//! Dispatch server.
//!
//! # Responsibilities
//! - Accept clients and spawn one supervised handler task each
//! - Report every handler outcome (logs and metrics)
//! - On shutdown: stop accepting, drain handlers within the grace period,
//!   abort the rest, close all backend connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::DispatcherConfig;
use crate::dispatch::error::DispatchError;
use crate::dispatch::handler::{handle_client, Dispatched};
use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::{BackendRegistry, RegistryError};
use crate::net::{Admission, ConnectionId, ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::resilience::TimeoutPolicy;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Server that routes client requests to backends.
#[derive(Debug)]
pub struct DispatchServer {
    registry: Arc<BackendRegistry>,
    tracker: ConnectionTracker,
    grace: Duration,
}

impl DispatchServer {
    /// Create a new server with the given configuration.
    pub fn new(config: &DispatcherConfig) -> Result<Self, RegistryError> {
        let registry = BackendRegistry::from_config(
            &config.backends,
            config.scheduler.strategy,
            TimeoutPolicy::from(&config.timeouts),
        )?;
        Ok(Self::with_registry(
            Arc::new(registry),
            Duration::from_secs(config.shutdown.grace_secs),
        ))
    }

    /// Create a server around an existing registry.
    pub fn with_registry(registry: Arc<BackendRegistry>, grace: Duration) -> Self {
        Self {
            registry,
            tracker: ConnectionTracker::new(),
            grace,
        }
    }

    pub fn registry(&self) -> Arc<BackendRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve until `shutdown` fires, then drain and close backends.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                strategy = self.registry.strategy_name(),
                backends = self.registry.len(),
                "Dispatch server starting"
            );
        }

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Request handler panicked");
                        }
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok(Admission::Admitted { stream, peer, permit }) => {
                        let guard = self.tracker.track();
                        let id = guard.id();
                        let registry = Arc::clone(&self.registry);
                        let span = tracing::debug_span!("client", connection_id = %id, peer = %peer);

                        handlers.spawn(
                            async move {
                                let start = Instant::now();
                                let outcome = handle_client(stream, &registry).await;
                                report(id, peer, &registry, outcome, start);
                                drop(permit);
                                drop(guard);
                            }
                            .instrument(span),
                        );
                    }
                    Ok(Admission::Rejected { peer, error }) => {
                        tracing::warn!(peer = %peer, error = %error, "Rejected connection");
                        metrics::record_rejected(error.kind());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
            }
        }

        // Stop accepting before draining.
        drop(listener);
        self.drain(&mut handlers).await;
        self.registry.close_all().await;

        tracing::info!("Dispatch server stopped");
    }

    async fn drain(&self, handlers: &mut JoinSet<()>) {
        if handlers.is_empty() {
            return;
        }

        tracing::info!(
            outstanding = handlers.len(),
            grace = ?self.grace,
            "Waiting for in-flight requests"
        );

        let drained = tokio::time::timeout(self.grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                abandoned = handlers.len(),
                "Grace period elapsed, aborting remaining handlers"
            );
            handlers.shutdown().await;
        }
    }
}

/// Log the outcome of one handler and count dropped clients.
///
/// Per-request counters and the virtual finish gauge are recorded by the
/// handler itself, so failed requests are covered too.
fn report(
    id: ConnectionId,
    peer: SocketAddr,
    registry: &BackendRegistry,
    outcome: Result<Dispatched, DispatchError>,
    start: Instant,
) {
    match outcome {
        Ok(done) => {
            let name = registry
                .backend(done.decision.index)
                .map_or("unknown", |b| b.name.as_str());
            tracing::info!(
                connection_id = %id,
                request = %done.request,
                backend = name,
                reconnected = done.reconnected,
                bytes = done.response_len,
                elapsed = ?start.elapsed(),
                "Request served"
            );
        }
        Err(DispatchError::Protocol(e)) => {
            tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Dropped malformed request");
            metrics::record_rejected("protocol");
        }
        Err(e @ DispatchError::Connect { .. }) => {
            let name = backend_name(registry, &e);
            tracing::warn!(connection_id = %id, backend = name, error = %e, "Backend unreachable");
            metrics::record_rejected(e.kind());
        }
        Err(e) => {
            let name = backend_name(registry, &e);
            tracing::warn!(
                connection_id = %id,
                backend = name,
                timeout = e.is_timeout(),
                error = %e,
                "Request failed"
            );
            metrics::record_rejected(e.kind());
        }
    }
}

/// Backend addresses are unique (checked at startup), so the address names
/// exactly one backend.
fn backend_name<'a>(registry: &'a BackendRegistry, error: &DispatchError) -> &'a str {
    let addr = match error {
        DispatchError::Connect { addr, .. } | DispatchError::BackendIo { addr, .. } => *addr,
        _ => return "none",
    };
    registry
        .backends()
        .iter()
        .find(|b| b.addr == addr)
        .map_or("unknown", |b| b.name.as_str())
}
