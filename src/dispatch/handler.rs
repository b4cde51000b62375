//! Per-client request handling.
//!
//! ```text
//! read 2 bytes → parse → pick backend → lock + connect → forward
//!     → single read (≤ 1024 bytes) → unlock → relay → close client
//! ```
//!
//! Every exit path closes the client. A failed request gets no bytes back.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dispatch::error::DispatchError;
use crate::dispatch::request::{ProtocolError, Request, REQUEST_LEN};
use crate::dispatch::response;
use crate::load_balancer::{BackendRegistry, ScheduleDecision};
use crate::observability::metrics;
use crate::resilience::with_timeout;

/// Summary of a successfully served request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub request: Request,
    pub decision: ScheduleDecision,
    /// Whether this request had to open a new backend connection.
    pub reconnected: bool,
    pub response_len: usize,
}

/// Serve one client connection to completion and close it.
pub async fn handle_client<S>(mut client: S, registry: &BackendRegistry) -> Result<Dispatched, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = serve(&mut client, registry).await;

    let close_limit = registry.timeouts().client_write;
    let _ = with_timeout(close_limit, client.shutdown()).await;

    result
}

async fn serve<S>(client: &mut S, registry: &BackendRegistry) -> Result<Dispatched, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeouts = *registry.timeouts();

    let request = read_request(client, timeouts.client_read).await?;
    let start = Instant::now();

    // The decision stands even if the backend turns out to be unreachable.
    let decision = registry.pick(&request);
    let name = registry
        .backend(decision.index)
        .map_or("unknown", |b| b.name.as_str());
    tracing::debug!(
        request = %request,
        backend = name,
        virtual_finish = ?decision.virtual_finish,
        "Scheduled request"
    );
    if let Some(finish) = decision.virtual_finish {
        metrics::record_virtual_finish(name, finish);
    }

    let result = forward(client, registry, &request, decision.index, name).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::record_request(request.kind.as_str(), name, outcome, start);

    let (reconnected, response_len) = result?;
    Ok(Dispatched {
        request,
        decision,
        reconnected,
        response_len,
    })
}

/// Exchange with the chosen backend and relay the reply.
/// Returns whether a new connection was opened and the reply length.
async fn forward<S>(
    client: &mut S,
    registry: &BackendRegistry,
    request: &Request,
    index: usize,
    name: &str,
) -> Result<(bool, usize), DispatchError>
where
    S: AsyncWrite + Unpin,
{
    let timeouts = *registry.timeouts();

    let mut connection = match registry.ensure_connected(index).await {
        Ok(connection) => connection,
        Err(e) => {
            if matches!(e, DispatchError::Connect { .. }) {
                metrics::record_backend_connect(name, false);
            }
            return Err(e);
        }
    };
    let reconnected = connection.opened_connection();
    if reconnected {
        metrics::record_backend_connect(name, true);
    }

    let response = connection.exchange(request, &timeouts).await?;
    registry.release(connection);

    response::relay(client, &response, timeouts.client_write).await?;
    Ok((reconnected, response.len()))
}

/// Read and validate exactly one request.
pub async fn read_request<R>(client: &mut R, limit: Option<Duration>) -> Result<Request, DispatchError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; REQUEST_LEN];
    with_timeout(limit, client.read_exact(&mut bytes))
        .await
        .map_err(|_| ProtocolError::ShortRead)?;
    Ok(Request::parse(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, SchedulingStrategy};
    use crate::load_balancer::{ManualClock, Role};
    use crate::resilience::TimeoutPolicy;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn unused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn registry(video: String, music: String) -> BackendRegistry {
        let configs = vec![
            BackendConfig { name: "video".into(), role: Role::Video, address: video },
            BackendConfig { name: "music".into(), role: Role::Music, address: music },
        ];
        BackendRegistry::with_clock(
            &configs,
            SchedulingStrategy::VirtualFinish,
            TimeoutPolicy::uniform(Duration::from_secs(2)),
            Arc::new(ManualClock::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn malformed_request_is_dropped_silently() {
        let registry = registry(unused_addr().await, unused_addr().await);
        let (proxy_side, mut client_side) = tokio::io::duplex(64);

        client_side.write_all(b"X5").await.unwrap();
        let err = handle_client(proxy_side, &registry).await.unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(ProtocolError::UnknownType(b'X'))));

        let mut received = Vec::new();
        client_side.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        // Nothing was scheduled and no backend was touched.
        assert_eq!(registry.virtual_finish_times(), vec![Duration::ZERO; 2]);
        assert!(registry.backends().iter().all(|b| b.connect_count() == 0 && b.failure_count() == 0));
    }

    #[tokio::test]
    async fn short_request_is_dropped() {
        let registry = registry(unused_addr().await, unused_addr().await);
        let (proxy_side, mut client_side) = tokio::io::duplex(64);

        client_side.write_all(b"M").await.unwrap();
        client_side.shutdown().await.unwrap();
        let err = handle_client(proxy_side, &registry).await.unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(ProtocolError::ShortRead)));
    }

    #[tokio::test]
    async fn unreachable_backend_still_commits_schedule() {
        let registry = registry(unused_addr().await, unused_addr().await);
        let (proxy_side, mut client_side) = tokio::io::duplex(64);

        client_side.write_all(b"M3").await.unwrap();
        let err = handle_client(proxy_side, &registry).await.unwrap_err();
        assert_eq!(err.kind(), "connect");

        let mut received = Vec::new();
        client_side.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        let music = registry.backend(1).unwrap();
        assert!(!music.is_connected());
        assert_eq!(
            registry.virtual_finish_times(),
            vec![Duration::ZERO, Duration::from_secs(3)]
        );
    }

    /// Value of the first rendered sample whose series starts with `prefix`.
    fn sample(rendered: &str, prefix: &str, label: &str) -> Option<f64> {
        rendered
            .lines()
            .filter(|line| line.starts_with(prefix) && line.contains(label))
            .find_map(|line| line.rsplit(' ').next()?.parse().ok())
    }

    #[test]
    fn failed_request_is_still_measured() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let registry = registry(unused_addr().await, unused_addr().await);
                let (proxy_side, mut client_side) = tokio::io::duplex(64);
                client_side.write_all(b"M3").await.unwrap();
                let err = handle_client(proxy_side, &registry).await.unwrap_err();
                assert_eq!(err.kind(), "connect");
            });
        });

        let rendered = handle.render();
        assert_eq!(
            sample(&rendered, "dispatcher_backend_virtual_finish_seconds{", r#"backend="music""#),
            Some(3.0)
        );
        assert_eq!(
            sample(&rendered, "dispatcher_requests_total{", r#"outcome="connect""#),
            Some(1.0)
        );
        assert_eq!(
            sample(&rendered, "dispatcher_backend_connects_total{", r#"result="error""#),
            Some(1.0)
        );
        assert_eq!(sample(&rendered, "dispatcher_requests_total{", r#"outcome="ok""#), None);
    }
}
