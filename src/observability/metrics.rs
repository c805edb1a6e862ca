//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_pool_requests_total` (counter): settled logical calls by outcome
//! - `proxy_pool_failovers_total` (counter): attempts sent after the first one
//! - `proxy_pool_inflight_attempts` (gauge): attempts currently on the wire
//! - `proxy_pool_bans_total` (counter): bans by datacenter
//! - `proxy_pool_alive_proxies` (gauge): selectable proxies by datacenter
//! - `proxy_pool_discovery_total` (counter): discovery rounds by datacenter, status
//! - `proxy_pool_attempt_duration_seconds` (histogram): successful attempt latency
//!
//! Every recorder is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_call(outcome: &'static str) {
    counter!("proxy_pool_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_failover() {
    counter!("proxy_pool_failovers_total").increment(1);
}

pub fn attempt_started() {
    gauge!("proxy_pool_inflight_attempts").increment(1.0);
}

pub fn attempt_finished() {
    gauge!("proxy_pool_inflight_attempts").decrement(1.0);
}

pub fn record_ban(datacenter: &str) {
    counter!("proxy_pool_bans_total", "datacenter" => datacenter.to_string()).increment(1);
}

pub fn record_alive_proxies(datacenter: &str, alive: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("proxy_pool_alive_proxies", "datacenter" => datacenter.to_string()).set(alive as f64);
}

pub fn record_discovery(datacenter: &str, status: &'static str) {
    counter!(
        "proxy_pool_discovery_total",
        "datacenter" => datacenter.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn record_attempt_duration(datacenter: &str, elapsed: Duration) {
    histogram!("proxy_pool_attempt_duration_seconds", "datacenter" => datacenter.to_string())
        .record(elapsed.as_secs_f64());
}
