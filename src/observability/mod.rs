//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pools, discovery, executor:
//!     → tracing events (datacenter, address, call_id, attempt fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via logging.rs (EnvFilter + fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
