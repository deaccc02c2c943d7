//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pool metrics (health, pending addresses, check outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `balancer_backends_healthy` (gauge): healthy backends in the registry
//! - `balancer_backends_configured` (gauge): configured addresses
//! - `balancer_backends_pending` (gauge): addresses without a live session
//! - `balancer_backend_health` (gauge): 1=healthy, 0=unhealthy, per identity
//! - `balancer_health_checks_total` (counter): check outcomes by `outcome`
//! - `balancer_dial_failures_total` (counter): failed dial/handshake attempts
//! - `balancer_config_broadcasts_total` (counter): CONFIG_UPDATE deliveries by `result`
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - Labels for backend identity and outcome only

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_backend_health(identity: &str, healthy: bool) {
    ::metrics::gauge!("balancer_backend_health", "identity" => identity.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_pool_status(healthy: usize, configured: usize, pending: usize) {
    ::metrics::gauge!("balancer_backends_healthy").set(healthy as f64);
    ::metrics::gauge!("balancer_backends_configured").set(configured as f64);
    ::metrics::gauge!("balancer_backends_pending").set(pending as f64);
}

pub fn record_health_check(outcome: &'static str) {
    ::metrics::counter!("balancer_health_checks_total", "outcome" => outcome).increment(1);
}

pub fn record_dial_failure() {
    ::metrics::counter!("balancer_dial_failures_total").increment(1);
}

pub fn record_broadcast(result: &'static str, count: usize) {
    ::metrics::counter!("balancer_config_broadcasts_total", "result" => result)
        .increment(count as u64);
}
