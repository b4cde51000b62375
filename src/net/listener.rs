//! TCP listener implementation with a concurrency ceiling.
//!
//! # Responsibilities
//! - Bind to the configured address with `SO_REUSEADDR` and a fixed backlog
//! - Accept incoming TCP connections
//! - Enforce max_connections via semaphore
//! - Reject, rather than queue, connections beyond the ceiling

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::dispatch::error::DispatchError;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// Result of one accept.
#[derive(Debug)]
pub enum Admission {
    /// Connection may be served. The permit must live as long as the handler.
    Admitted {
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
    },
    /// Ceiling reached. The stream has already been closed.
    Rejected { peer: SocketAddr, error: DispatchError },
}

/// A TCP listener that caps concurrent handlers.
///
/// When the limit is reached, new connections are accepted and closed
/// immediately so the client sees a prompt close with no response.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// `None` when the ceiling is disabled.
    connection_limit: Option<Arc<Semaphore>>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ListenerError::Bind)?;
        socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;
        socket.bind(addr).map_err(ListenerError::Bind)?;
        let listener = socket.listen(config.backlog).map_err(ListenerError::Bind)?;

        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(inner: TcpListener, max_connections: usize) -> Self {
        let connection_limit = (max_connections > 0).then(|| Arc::new(Semaphore::new(max_connections)));

        if let Ok(local_addr) = inner.local_addr() {
            tracing::info!(
                address = %local_addr,
                max_connections,
                "Listener bound"
            );
        }

        Self {
            inner,
            connection_limit,
            max_connections,
        }
    }

    /// Accept the next connection and decide whether it may be served.
    pub async fn accept(&self) -> Result<Admission, ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        let permit = match &self.connection_limit {
            None => ConnectionPermit { _permit: None },
            Some(limit) => match limit.clone().try_acquire_owned() {
                Ok(permit) => ConnectionPermit { _permit: Some(permit) },
                Err(_) => {
                    drop(stream);
                    return Ok(Admission::Rejected {
                        peer,
                        error: DispatchError::Capacity {
                            limit: self.max_connections,
                        },
                    });
                }
            },
        };

        tracing::trace!(
            peer_addr = %peer,
            available_permits = self.available_permits(),
            "Connection accepted"
        );

        Ok(Admission::Admitted { stream, peer, permit })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots. `usize::MAX` when unbounded.
    pub fn available_permits(&self) -> usize {
        self.connection_limit
            .as_ref()
            .map_or(usize::MAX, |limit| limit.available_permits())
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a handler slot.
///
/// When dropped, the slot is released back to the pool.
/// This holds even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}
