//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the cluster client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Datacenter preferred when it has an immediate candidate.
    pub local_datacenter: Option<String>,

    /// One pool (and one discovery loop) per entry.
    pub datacenters: Vec<DatacenterConfig>,

    pub pool: PoolConfig,

    pub discovery: DiscoveryConfig,

    pub timeouts: TimeoutConfig,

    pub balancing: BalancingConfig,

    pub health: HealthConfig,

    pub observability: ObservabilityConfig,
}

/// A datacenter and where to find its proxies.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatacenterConfig {
    /// Unique datacenter name, used in logs and metrics labels.
    pub name: String,

    pub source: SourceConfig,

    /// Proxies applied to the roster at startup, before the first discovery round.
    #[serde(default)]
    pub initial_proxies: Vec<String>,
}

/// Address source of one datacenter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Ask the cluster HTTP balancer.
    Http {
        /// Balancer host, optionally with port (e.g. "hahn.example.net").
        balancer: String,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        use_tls: bool,
    },
    /// Ask the proxies themselves; needs `initial_proxies` to start from.
    Rpc {
        #[serde(default)]
        role: Option<String>,
    },
    /// A fixed list.
    Static { proxies: Vec<String> },
}

/// Pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of proxies kept per datacenter.
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_size: 3 }
    }
}

/// Discovery schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval between discovery rounds in milliseconds.
    pub refresh_period_ms: u64,

    /// Upper bound on one discovery request in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_period_ms: 60_000,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_period_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Call timing budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wall-clock bound for a whole logical call in milliseconds.
    pub global_ms: u64,

    /// Time one attempt gets before the next candidate is tried, in milliseconds.
    pub failover_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            global_ms: 60_000,
            failover_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn global(&self) -> Duration {
        Duration::from_millis(self.global_ms)
    }

    pub fn failover(&self) -> Duration {
        Duration::from_millis(self.failover_ms)
    }
}

/// Candidate selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancingConfig {
    /// How many candidates a logical call may fail over across.
    pub fan_out: usize,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self { fan_out: 3 }
    }
}

/// Latency tracking and active pings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Ping every alive proxy in the background.
    pub ping_enabled: bool,

    pub ping_interval_ms: u64,

    pub ping_timeout_ms: u64,

    /// Samples kept per destination and per datacenter.
    pub latency_window: usize,

    /// Percentile used to rank datacenters (0.99 = p99).
    pub quantile: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_enabled: false,
            ping_interval_ms: 5_000,
            ping_timeout_ms: 5_000,
            latency_window: 1_000,
            quantile: 0.99,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
