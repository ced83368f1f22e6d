//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, cache status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_cache_lookups_total` (counter): cache hits and misses
//! - `gateway_cache_entries` (gauge): entries currently held
//! - `gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_breaker_transitions_total` (counter): transitions by target state
//! - `gateway_breaker_rejections_total` (counter): fail-fast rejections
//! - `gateway_upstream_duration_seconds` (histogram): dispatch latency by outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::BreakerState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

/// Record a completed gateway request.
pub fn record_request(method: &str, status: u16, cache: &'static str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "cache" => cache,
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("gateway_cache_entries").set(entries as f64);
}

pub fn record_breaker_transition(to: BreakerState) {
    gauge!("gateway_breaker_state").set(to as u8 as f64);
    counter!("gateway_breaker_transitions_total", "to" => to.as_str()).increment(1);
}

pub fn record_breaker_rejection() {
    counter!("gateway_breaker_rejections_total").increment(1);
}

pub fn record_upstream(outcome: &'static str, start: Instant) {
    histogram!("gateway_upstream_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}
