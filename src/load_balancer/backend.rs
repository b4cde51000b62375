//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server (name, role, address)
//! - Own the backend's one persistent connection behind its own lock
//! - Connect lazily, tear down on any I/O failure
//! - Track counters for the admin API

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};

use crate::dispatch::error::DispatchError;
use crate::dispatch::request::{Request, REQUEST_LEN};
use crate::dispatch::response::MAX_RESPONSE_LEN;
use crate::load_balancer::cost::Role;
use crate::resilience::{with_timeout, TimeoutPolicy};

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    pub name: String,
    pub role: Role,
    pub addr: SocketAddr,
    /// The persistent connection. `None` means disconnected.
    connection: Mutex<Option<TcpStream>>,
    /// Mirror of the handle state for lock-free reporting.
    connected: AtomicBool,
    connects: AtomicU64,
    served: AtomicU64,
    failures: AtomicU64,
}

impl Backend {
    /// Create a new backend. It starts disconnected.
    pub fn new(name: impl Into<String>, role: Role, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            role,
            addr,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            served: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Wait for exclusive use of this backend's connection.
    ///
    /// Only one request may hold the returned guard at a time.
    pub async fn lock(&self) -> BackendConnection<'_> {
        BackendConnection {
            backend: self,
            slot: self.connection.lock().await,
            in_flight: false,
            opened: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Successful connection attempts so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn served_count(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Exclusive access to a backend's connection handle.
///
/// Dropping the guard releases the backend. If it is dropped while a write or
/// read is half done (for example because the task was aborted), the
/// connection is torn down first so the next holder never sees a stream in an
/// unknown state.
#[derive(Debug)]
pub struct BackendConnection<'a> {
    backend: &'a Backend,
    slot: MutexGuard<'a, Option<TcpStream>>,
    in_flight: bool,
    opened: bool,
}

impl<'a> BackendConnection<'a> {
    pub fn backend(&self) -> &'a Backend {
        self.backend
    }

    pub fn is_connected(&self) -> bool {
        self.slot.is_some()
    }

    /// Whether this guard opened the current connection itself.
    pub fn opened_connection(&self) -> bool {
        self.opened
    }

    /// Connect if disconnected. Returns `true` when a new connection was made.
    ///
    /// A kept connection is first cleared of bytes left over from an earlier
    /// reply. If the backend has closed it in the meantime it is replaced.
    /// A single connect attempt is made; there is no retry loop at this layer.
    pub async fn ensure_connected(&mut self, timeouts: &TimeoutPolicy) -> Result<bool, DispatchError> {
        if self.slot.is_some() {
            if self.discard_stale() {
                return Ok(false);
            }
            self.teardown();
        }

        let addr = self.backend.addr;
        match with_timeout(timeouts.connect, TcpStream::connect(addr)).await {
            Ok(stream) => {
                // Requests are tiny; don't let Nagle hold them back.
                let _ = stream.set_nodelay(true);
                *self.slot = Some(stream);
                self.opened = true;
                self.backend.connected.store(true, Ordering::Relaxed);
                self.backend.connects.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(backend = %self.backend.name, addr = %addr, "Backend connected");
                Ok(true)
            }
            Err(source) => {
                self.backend.failures.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::Connect { addr, source })
            }
        }
    }

    /// Forward `request` and read the backend's reply in a single receive.
    ///
    /// Any failure, including an empty read, tears the connection down before
    /// returning.
    pub async fn exchange(
        &mut self,
        request: &Request,
        timeouts: &TimeoutPolicy,
    ) -> Result<Vec<u8>, DispatchError> {
        let addr = self.backend.addr;
        let Some(stream) = self.slot.as_mut() else {
            return Err(DispatchError::BackendIo {
                addr,
                source: std::io::ErrorKind::NotConnected.into(),
            });
        };

        self.in_flight = true;
        let bytes: [u8; REQUEST_LEN] = request.to_bytes();
        let result = async {
            with_timeout(timeouts.backend_write, stream.write_all(&bytes)).await?;

            let mut buf = vec![0u8; MAX_RESPONSE_LEN];
            let n = with_timeout(timeouts.backend_read, stream.read(&mut buf)).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "backend closed the connection without a response",
                ));
            }
            buf.truncate(n);
            Ok(buf)
        }
        .await;
        self.in_flight = false;

        match result {
            Ok(response) => {
                self.backend.served.fetch_add(1, Ordering::Relaxed);
                // A full buffer may be a truncated reply; the rest must not
                // reach the next client.
                if response.len() == MAX_RESPONSE_LEN {
                    tracing::debug!(backend = %self.backend.name, "Reply filled the buffer, dropping connection");
                    self.teardown();
                }
                Ok(response)
            }
            Err(source) => {
                self.teardown();
                self.backend.failures.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::BackendIo { addr, source })
            }
        }
    }

    /// Read and throw away anything already waiting on the connection.
    ///
    /// Returns `false` if the backend closed the connection or it failed.
    fn discard_stale(&mut self) -> bool {
        let Some(stream) = self.slot.as_ref() else {
            return false;
        };

        let mut scratch = [0u8; MAX_RESPONSE_LEN];
        let mut discarded = 0usize;
        loop {
            match stream.try_read(&mut scratch) {
                Ok(0) => {
                    tracing::debug!(backend = %self.backend.name, "Idle backend connection was closed by peer");
                    return false;
                }
                Ok(n) => discarded += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(backend = %self.backend.name, error = %e, "Idle backend connection failed");
                    return false;
                }
            }
        }

        if discarded > 0 {
            tracing::warn!(backend = %self.backend.name, bytes = discarded, "Discarded unsolicited backend bytes");
        }
        true
    }

    /// Drop the connection and mark the backend disconnected.
    pub fn teardown(&mut self) {
        if self.slot.take().is_some() {
            tracing::debug!(backend = %self.backend.name, addr = %self.backend.addr, "Backend connection torn down");
        }
        self.backend.connected.store(false, Ordering::Relaxed);
    }
}

impl Drop for BackendConnection<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy::uniform(std::time::Duration::from_secs(5))
    }

    #[tokio::test]
    async fn connects_lazily_and_reuses_the_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            while socket.read_exact(&mut buf).await.is_ok() {
                socket.write_all(&buf).await.unwrap();
            }
        });

        let backend = Backend::new("b0", Role::Video, addr);
        assert!(!backend.is_connected());

        let request = Request::parse(*b"V3").unwrap();
        for _ in 0..3 {
            let mut conn = backend.lock().await;
            conn.ensure_connected(&policy()).await.unwrap();
            assert_eq!(conn.exchange(&request, &policy()).await.unwrap(), b"V3");
        }

        assert!(backend.is_connected());
        assert_eq!(backend.connect_count(), 1);
        assert_eq!(backend.served_count(), 3);
    }

    #[tokio::test]
    async fn empty_read_tears_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            let _ = socket.read_exact(&mut buf).await;
            // Close without replying.
        });

        let backend = Backend::new("b0", Role::Music, addr);
        let mut conn = backend.lock().await;
        assert!(conn.ensure_connected(&policy()).await.unwrap());

        let err = conn.exchange(&Request::parse(*b"M1").unwrap(), &policy()).await.unwrap_err();
        assert_eq!(err.kind(), "backend_io");
        assert!(!conn.is_connected());
        drop(conn);
        assert!(!backend.is_connected());
        assert_eq!(backend.failure_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_backend_stays_disconnected() {
        // Reserve a port, then free it so nothing is listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let backend = Backend::new("dead", Role::Video, addr);
        let mut conn = backend.lock().await;
        let err = conn.ensure_connected(&policy()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connect { addr: a, .. } if a == addr));
        assert!(!conn.is_connected());
        assert_eq!(backend.connect_count(), 0);
    }

    #[tokio::test]
    async fn exchange_without_connection_fails() {
        let backend = Backend::new("b0", Role::Video, "127.0.0.1:9".parse().unwrap());
        let mut conn = backend.lock().await;
        let err = conn.exchange(&Request::parse(*b"P2").unwrap(), &policy()).await.unwrap_err();
        assert_eq!(err.kind(), "backend_io");
    }

    #[tokio::test]
    async fn late_reply_bytes_are_discarded_before_reuse() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"first").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            socket.write_all(b"-tail").await.unwrap();

            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"second").await.unwrap();
            let _ = socket.read(&mut buf).await;
        });

        let backend = Backend::new("b0", Role::Video, addr);
        {
            let mut conn = backend.lock().await;
            conn.ensure_connected(&policy()).await.unwrap();
            let reply = conn.exchange(&Request::parse(*b"V1").unwrap(), &policy()).await.unwrap();
            assert_eq!(reply, b"first");
        }

        // Let the tail of the first reply arrive while the connection is idle.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let mut conn = backend.lock().await;
        assert!(!conn.ensure_connected(&policy()).await.unwrap());
        let reply = conn.exchange(&Request::parse(*b"V2").unwrap(), &policy()).await.unwrap();
        assert_eq!(reply, b"second");
        assert_eq!(backend.connect_count(), 1);
    }

    #[tokio::test]
    async fn idle_connection_closed_by_peer_is_replaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // First connection answers once and hangs up.
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
            drop(socket);

            let (mut socket, _) = listener.accept().await.unwrap();
            while socket.read_exact(&mut buf).await.is_ok() {
                socket.write_all(&buf).await.unwrap();
            }
        });

        let backend = Backend::new("b0", Role::Music, addr);
        {
            let mut conn = backend.lock().await;
            conn.ensure_connected(&policy()).await.unwrap();
            assert_eq!(conn.exchange(&Request::parse(*b"M1").unwrap(), &policy()).await.unwrap(), b"M1");
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let mut conn = backend.lock().await;
        assert!(conn.ensure_connected(&policy()).await.unwrap());
        assert_eq!(conn.exchange(&Request::parse(*b"M2").unwrap(), &policy()).await.unwrap(), b"M2");
        assert_eq!(backend.connect_count(), 2);
        assert_eq!(backend.failure_count(), 0);
    }
}

