//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define edge metrics (requests, latency, upstream outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `edgeway_requests_total` (counter): requests by method, status
//! - `edgeway_request_duration_seconds` (histogram): latency distribution
//! - `edgeway_upstream_requests_total` (counter): backend calls by kind,
//!   backend, outcome
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality: no paths, no request ids

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished client request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "edgeway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("edgeway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Backend call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Timeout,
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Timeout => "timeout",
            Outcome::Error => "error",
        }
    }
}

/// Record one call to a backend (`kind` is `proxy` or `fastcgi`).
pub fn record_upstream(kind: &'static str, backend: &str, outcome: Outcome) {
    counter!(
        "edgeway_upstream_requests_total",
        "kind" => kind,
        "backend" => backend.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}
