//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatcher_requests_total` (counter): requests by type, backend, outcome
//! - `dispatcher_request_duration_seconds` (histogram): latency per backend
//! - `dispatcher_rejected_total` (counter): dropped clients by reason
//! - `dispatcher_backend_connects_total` (counter): connects by backend, result
//! - `dispatcher_backend_virtual_finish_seconds` (gauge): committed finish time
//! - `dispatcher_active_connections` (gauge): live client handlers
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(kind: &'static str, backend: &str, outcome: &'static str, start: Instant) {
    counter!(
        "dispatcher_requests_total",
        "type" => kind,
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("dispatcher_request_duration_seconds", "backend" => backend.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejected(reason: &'static str) {
    counter!("dispatcher_rejected_total", "reason" => reason).increment(1);
}

pub fn record_backend_connect(backend: &str, success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!(
        "dispatcher_backend_connects_total",
        "backend" => backend.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_virtual_finish(backend: &str, finish: Duration) {
    gauge!("dispatcher_backend_virtual_finish_seconds", "backend" => backend.to_string())
        .set(finish.as_secs_f64());
}

pub fn set_active_connections(active: u64) {
    gauge!("dispatcher_active_connections").set(active as f64);
}
