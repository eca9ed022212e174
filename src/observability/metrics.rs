//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_requests_total` (counter): requests by outcome
//! - `gate_cache_lookups_total` (counter): verdict cache hits and misses
//! - `gate_jail_events_total` (counter): offenses, jailings, releases
//! - `gate_inspector_duration_seconds` (histogram): inspector call latency
//!
//! Recording is a no-op until a recorder is installed.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Count a finished request by how the gate disposed of it.
pub fn record_request(outcome: &'static str) {
    counter!("gate_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gate_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_jail_event(event: &'static str) {
    counter!("gate_jail_events_total", "event" => event).increment(1);
}

pub fn record_inspector_call(start: Instant) {
    histogram!("gate_inspector_duration_seconds").record(start.elapsed().as_secs_f64());
}
