//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (metrics exporter, admin API, signal watcher)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use thiserror::Error;

use crate::admin;
use crate::config::DispatcherConfig;
use crate::dispatch::DispatchServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::RegistryError;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid backend set: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("invalid address {0:?}")]
    Address(String),
    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to start admin API: {0}")]
    Admin(#[source] std::io::Error),
}

/// Run the dispatcher until a termination signal arrives.
pub async fn run(config: DispatcherConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let server = DispatchServer::new(&config)?;

    if config.admin.enabled {
        let listener = tokio::net::TcpListener::bind(&config.admin.bind_address)
            .await
            .map_err(StartupError::Admin)?;
        let state = admin::AdminState::new(server.registry(), server.tracker(), config.admin.api_key.clone());
        let signal = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, signal).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let listener = Listener::bind(&config.listener).await?;
    let server_signal = shutdown.subscribe();

    let serving = tokio::spawn(server.run(listener, server_signal));

    match signals::wait_for_signal().await {
        Ok(name) => tracing::info!(signal = name, "Termination signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for signals, shutting down"),
    }
    shutdown.trigger();

    if let Err(e) = serving.await {
        tracing::error!(error = %e, "Dispatch server task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
