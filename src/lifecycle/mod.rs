//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! ClusterClient::start:
//!     discovery loops spawned → pinger subscribes to Shutdown
//!
//! ClusterClient::close:
//!     stop discovery → Shutdown::trigger (pinger exits) → close every pool
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
