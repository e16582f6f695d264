//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, denials)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): total requests by method, status, route
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_policy_denials_total` (counter): denials by route
//!
//! # Design Decisions
//! - Labels for route, method, status code
//! - The exporter binds its own address so scrapes never mix with
//!   proxied traffic

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::ObservabilityConfig;

/// Install the Prometheus recorder and scrape endpoint when enabled.
pub fn init_metrics(config: &ObservabilityConfig) {
    if !config.metrics_enabled {
        return;
    }
    let address: SocketAddr = match config.metrics_address.parse() {
        Ok(address) => address,
        Err(error) => {
            tracing::error!(
                address = %config.metrics_address,
                error = %error,
                "Invalid metrics address, metrics disabled"
            );
            return;
        }
    };
    match PrometheusBuilder::new().with_http_listener(address).install() {
        Ok(()) => tracing::info!(address = %address, "Metrics endpoint listening"),
        Err(error) => {
            tracing::error!(error = %error, "Failed to install metrics exporter")
        }
    }
}

/// Record one completed request.
pub fn record_request(method: &str, status: u16, route: &str, start_time: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    metrics::counter!("proxy_requests_total", &labels).increment(1);
    metrics::histogram!("proxy_request_duration_seconds", &labels)
        .record(start_time.elapsed().as_secs_f64());
    if status == 403 {
        metrics::counter!("proxy_policy_denials_total", "route" => route.to_string())
            .increment(1);
    }
}
