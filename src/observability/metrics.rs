//! Metrics collection and exposition.
//!
//! # Metrics
//! - `worker_requests_total` (counter): accepted requests by outcome
//! - `worker_request_duration_seconds` (histogram): accept to end of reset
//! - `worker_provider_resets_total` (counter): resets by provider and result

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished iteration.
pub fn record_request(outcome: &'static str, start: Instant) {
    ::metrics::counter!("worker_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("worker_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record one provider reset.
pub fn record_provider_reset(provider: &str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    ::metrics::counter!(
        "worker_provider_resets_total",
        "provider" => provider.to_string(),
        "result" => result
    )
    .increment(1);
}
