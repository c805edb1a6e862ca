//! Client-side RPC proxy connection pool.
//!
//! Keeps a live set of connections to the RPC proxies of several
//! datacenters, picks the best candidates for every call and fails over
//! between them under a single deadline.

pub mod client;
pub mod config;
pub mod discovery;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;

pub use client::{ClientError, ClusterClient, ClusterClientBuilder};
pub use config::ClientConfig;
pub use lifecycle::Shutdown;
pub use resilience::{CallError, CallHandle, CallResult};
