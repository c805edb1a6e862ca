//! Per-destination and per-datacenter latency tracking.
//!
//! # Responsibilities
//! - Record attempt and ping latencies
//! - Answer percentile queries used to rank datacenters
//!
//! Values are approximate and eventually consistent. They only steer
//! selection, nothing depends on them for correctness.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::health::latency::LatencyWindow;

/// Point-in-time view of tracked percentiles, in microseconds.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub datacenters: BTreeMap<String, f64>,
    pub destinations: BTreeMap<String, f64>,
}

/// Rolling latency percentiles keyed by destination and by datacenter.
#[derive(Debug)]
pub struct HealthTracker {
    window: usize,
    quantile: f64,
    destinations: DashMap<String, LatencyWindow>,
    datacenters: DashMap<String, LatencyWindow>,
}

impl HealthTracker {
    /// `window` samples are kept per key; `quantile` is the ranked percentile (e.g. 0.99).
    pub fn new(window: usize, quantile: f64) -> Self {
        Self {
            window,
            quantile,
            destinations: DashMap::new(),
            datacenters: DashMap::new(),
        }
    }

    /// Record one observed latency for `destination`, which lives in `datacenter`.
    pub fn record_latency(&self, datacenter: &str, destination: &str, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        Self::record_into(&self.destinations, destination, self.window, micros);
        Self::record_into(&self.datacenters, datacenter, self.window, micros);
    }

    fn record_into(map: &DashMap<String, LatencyWindow>, key: &str, window: usize, micros: u64) {
        if let Some(tracker) = map.get(key) {
            tracker.record(micros);
            return;
        }
        map.entry(key.to_string())
            .or_insert_with(|| LatencyWindow::new(window))
            .record(micros);
    }

    /// Ranked percentile for a datacenter; 0.0 when nothing was measured yet.
    pub fn datacenter_percentile(&self, datacenter: &str) -> f64 {
        self.datacenters
            .get(datacenter)
            .and_then(|w| w.percentile(self.quantile))
            .unwrap_or(0.0)
    }

    /// Ranked percentile for a single destination; 0.0 when unknown.
    pub fn destination_percentile(&self, destination: &str) -> f64 {
        self.destinations
            .get(destination)
            .and_then(|w| w.percentile(self.quantile))
            .unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let collect = |map: &DashMap<String, LatencyWindow>| {
            map.iter()
                .filter_map(|r| r.value().percentile(self.quantile).map(|p| (r.key().clone(), p)))
                .collect()
        };
        HealthSnapshot {
            datacenters: collect(&self.datacenters),
            destinations: collect(&self.destinations),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(1000, 0.99)
    }
}
