//! Pool and selector errors.

use std::sync::Arc;

use thiserror::Error;

use crate::discovery::DiscoveryError;

/// Errors returned when no connection can be handed out.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The pool has nothing to offer and the next roster update did not help.
    #[error(
        "pool is exhausted: cannot get rpc proxies in datacenter '{datacenter}'{}",
        .cause.as_ref().map(|c| format!(": {}", c)).unwrap_or_default()
    )]
    Exhausted {
        datacenter: String,
        #[source]
        cause: Option<Arc<DiscoveryError>>,
    },

    /// The pool was shut down.
    #[error("pool for datacenter '{datacenter}' is closed")]
    Closed { datacenter: String },

    /// The selector was built without any datacenter pools.
    #[error("no datacenter pools configured")]
    NoDatacenters,

    /// Every datacenter failed to produce a connection.
    #[error("all datacenters are unavailable: [{}]", join(.0))]
    AllDatacentersUnavailable(Vec<PoolError>),
}

fn join(errors: &[PoolError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
