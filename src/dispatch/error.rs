//! Error kinds produced while serving a single client.
//!
//! Every variant is terminal for the request it occurred in and never
//! escapes the handler task. The server loop is the only place these are
//! logged or counted.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::dispatch::request::ProtocolError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed or truncated request. Client is dropped silently.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Backend could not be reached. Backend stays disconnected.
    #[error("failed to connect to backend {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Established backend connection failed mid-request and was torn down.
    #[error("backend {addr} I/O failure: {source}")]
    BackendIo {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Response could not be written back to the client.
    #[error("failed to relay response to client: {0}")]
    ClientIo(#[source] io::Error),

    /// Concurrency ceiling reached; connection closed on accept.
    #[error("connection limit of {limit} reached")]
    Capacity { limit: usize },
}

impl DispatchError {
    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Protocol(_) => "protocol",
            DispatchError::Connect { .. } => "connect",
            DispatchError::BackendIo { .. } => "backend_io",
            DispatchError::ClientIo(_) => "client_io",
            DispatchError::Capacity { .. } => "capacity",
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            DispatchError::Connect { source, .. }
            | DispatchError::BackendIo { source, .. }
            | DispatchError::ClientIo(source) => source.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert_eq!(DispatchError::from(ProtocolError::ShortRead).kind(), "protocol");
        assert_eq!(
            DispatchError::Connect { addr, source: io::ErrorKind::ConnectionRefused.into() }.kind(),
            "connect"
        );
        assert_eq!(DispatchError::Capacity { limit: 4 }.kind(), "capacity");
    }

    #[test]
    fn connect_error_reports_address_and_port() {
        let addr: SocketAddr = "192.168.0.103:80".parse().unwrap();
        let err = DispatchError::Connect { addr, source: io::ErrorKind::ConnectionRefused.into() };
        assert!(err.to_string().contains("192.168.0.103:80"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn detects_timeouts() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let err = DispatchError::BackendIo { addr, source: io::ErrorKind::TimedOut.into() };
        assert!(err.is_timeout());
    }
}
