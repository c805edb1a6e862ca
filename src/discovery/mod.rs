//! Proxy discovery subsystem.
//!
//! # Data Flow
//! ```text
//! DiscoveryService tick (every refresh period)
//!     → ProxySource::fetch (HTTP balancer, the proxies themselves, or static list)
//!     → Ok(addresses)  → DatacenterPool::update_roster
//!     → Err(error)     → DatacenterPool::update_failed (wakes waiting peekers)
//! ```
//!
//! # Design Decisions
//! - A failed round is never fatal; the loop keeps its schedule
//! - One service per datacenter, each owning its source

pub mod http;
pub mod rpc;
pub mod service;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::SourceConfig;
use crate::load_balancer::DatacenterPool;

pub use http::HttpProxySource;
pub use rpc::RpcProxySource;
pub use service::{DiscoveryOptions, DiscoveryService};
pub use source::{ProxySource, StaticProxySource};

/// Errors from one discovery round.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Http(String),

    #[error("discovery endpoint returned HTTP {0}")]
    Status(u16),

    #[error("cannot decode discovery response: {0}")]
    Decode(String),

    #[error("invalid proxy address '{0}'")]
    InvalidAddress(String),

    #[error("discovery call failed: {0}")]
    Rpc(String),

    #[error("no alive proxy in datacenter '{0}' to ask for the proxy list")]
    NoProxy(String),

    #[error("discovery request timed out")]
    Timeout,

    #[error("discovery service is stopped")]
    Stopped,
}

/// Build the address source described by a datacenter's configuration.
///
/// `rpc` sources ask the datacenter's own proxies and need its `pool`.
pub fn source_from_config(
    config: &SourceConfig,
    fetch_timeout: Duration,
    pool: Option<&Arc<DatacenterPool>>,
) -> Result<Arc<dyn ProxySource>, DiscoveryError> {
    let source: Arc<dyn ProxySource> = match config {
        SourceConfig::Http {
            balancer,
            role,
            token,
            use_tls,
        } => Arc::new(HttpProxySource::new(
            balancer,
            role.as_deref(),
            token.clone(),
            *use_tls,
            fetch_timeout,
        )?),
        SourceConfig::Rpc { role } => match pool {
            Some(pool) => Arc::new(RpcProxySource::new(pool.clone(), role.clone(), fetch_timeout)),
            None => return Err(DiscoveryError::Rpc("rpc discovery needs a connected pool".into())),
        },
        SourceConfig::Static { proxies } => Arc::new(StaticProxySource::parse(proxies)?),
    };
    Ok(source)
}
