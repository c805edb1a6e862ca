//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Successful attempt (resilience::failover)
//!     → tracker.rs record_latency(datacenter, destination)
//!
//! Active pinger (active.rs):
//!     Periodic timer
//!     → Ping every alive connection
//!     → record_latency on success, failure detector bans on fatal errors
//!
//! Selector:
//!     → datacenter_percentile() to rank immediate candidates
//! ```
//!
//! # Design Decisions
//! - Percentiles only steer selection; stale reads are acceptable
//! - Rolling windows, no decay timers

pub mod active;
pub mod latency;
pub mod tracker;

pub use active::Pinger;
pub use latency::LatencyWindow;
pub use tracker::{HealthSnapshot, HealthTracker};
