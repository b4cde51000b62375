//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use media_dispatcher::config::{BackendConfig, SchedulingStrategy};
use media_dispatcher::lifecycle::Shutdown;
use media_dispatcher::load_balancer::{BackendRegistry, ManualClock, Role};
use media_dispatcher::net::Listener;
use media_dispatcher::resilience::TimeoutPolicy;
use media_dispatcher::DispatchServer;

/// What a programmable backend does with one request.
#[derive(Debug, Clone)]
pub enum Action {
    Reply(Vec<u8>),
    /// Wait, then reply.
    Delay(Duration, Vec<u8>),
    /// Close the connection without replying.
    Close,
}

/// Handle to a running mock backend.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<[u8; 2]>>>,
}

impl MockBackend {
    /// Number of TCP connections the backend has accepted.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn received(&self) -> Vec<[u8; 2]> {
        self.received.lock().unwrap().clone()
    }

    pub fn config(&self, name: &str, role: Role) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            role,
            address: self.addr.to_string(),
        }
    }
}

/// Start a backend that answers every request on a persistent connection.
///
/// `f` gets the global request number (starting at 0) and the request bytes.
pub async fn start_programmable_backend<F>(f: F) -> MockBackend
where
    F: Fn(usize, [u8; 2]) -> Action + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        accepts: Arc::new(AtomicUsize::new(0)),
        received: Arc::new(Mutex::new(Vec::new())),
    };
    let f = Arc::new(f);
    let counter = Arc::new(AtomicUsize::new(0));

    let state = backend.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            state.accepts.fetch_add(1, Ordering::SeqCst);
            let f = f.clone();
            let counter = counter.clone();
            let received = state.received.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 2];
                while socket.read_exact(&mut buf).await.is_ok() {
                    received.lock().unwrap().push(buf);
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    match f(n, buf) {
                        Action::Reply(bytes) => {
                            if socket.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Action::Delay(wait, bytes) => {
                            tokio::time::sleep(wait).await;
                            if socket.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Action::Close => break,
                    }
                }
            });
        }
    });

    backend
}

/// Start a backend that replies `<tag>:<request>\n`.
pub async fn start_tagged_backend(tag: &'static str) -> MockBackend {
    start_programmable_backend(move |_, req| {
        Action::Reply(format!("{}:{}\n", tag, String::from_utf8_lossy(&req)).into_bytes())
    })
    .await
}

/// An address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running dispatcher bound to an ephemeral port, on a frozen clock.
pub struct TestDispatcher {
    pub addr: SocketAddr,
    pub registry: Arc<BackendRegistry>,
    pub clock: Arc<ManualClock>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestDispatcher {
    /// Trigger shutdown and wait for the server loop to finish.
    pub async fn stop(self) -> Arc<BackendRegistry> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
        self.registry
    }
}

pub async fn start_dispatcher(
    backends: Vec<BackendConfig>,
    strategy: SchedulingStrategy,
    max_connections: usize,
) -> TestDispatcher {
    let clock = Arc::new(ManualClock::default());
    let registry = Arc::new(
        BackendRegistry::with_clock(
            &backends,
            strategy,
            TimeoutPolicy::uniform(Duration::from_secs(5)),
            clock.clone(),
        )
        .unwrap(),
    );

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, max_connections);

    let shutdown = Shutdown::new();
    let server = DispatchServer::with_registry(registry.clone(), Duration::from_secs(2));
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestDispatcher {
        addr,
        registry,
        clock,
        shutdown,
        handle,
    }
}

/// Send raw request bytes and collect everything until the dispatcher closes.
///
/// The write half is closed after sending, so a short request is seen as EOF.
pub async fn send_request(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("dispatcher did not close the client")
        .unwrap();
    response
}
