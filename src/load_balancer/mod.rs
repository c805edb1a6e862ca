//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Discovery → pool.rs (update_roster: ban removed, connect added)
//!     → published snapshot of alive entries (ArcSwap)
//!
//! Call → selector.rs
//!     → local pool try_peek
//!     → else every pool try_peek, rank by datacenter latency
//!     → else race pool.peek() across datacenters
//!     → entry.rs Lease (ref held until the attempt settles)
//! ```
//!
//! # Design Decisions
//! - Uniform random choice inside a datacenter; latency only ranks datacenters
//! - Single writer per pool, lock-free readers
//! - A banned entry drains: its connection closes when the last lease drops

pub mod entry;
pub mod error;
pub mod pool;
pub mod selector;

pub use entry::{Lease, PooledEntry};
pub use error::PoolError;
pub use pool::{DatacenterPool, PoolOptions, RosterDiff};
pub use selector::MultiDcSelector;
