//! Discovery through the proxies themselves.
//!
//! Sends `DiscoveryService.DiscoverProxies` over a connection leased from
//! the datacenter's own pool. The pool must be seeded with `initial_proxies`
//! before the first round; afterwards each round asks one of the proxies the
//! previous round returned. Request and response attachments are JSON:
//! `{"type": "rpc", "role": R}` out, `{"proxies": ["host:port", ...]}` back.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::time;

use crate::discovery::http::decode_response;
use crate::discovery::source::ProxySource;
use crate::discovery::DiscoveryError;
use crate::load_balancer::DatacenterPool;
use crate::net::{Address, ResponseSink, RpcRequest, SinkEvent};

pub const DISCOVERY_SERVICE: &str = "DiscoveryService";
pub const DISCOVER_PROXIES: &str = "DiscoverProxies";

#[derive(Debug, Serialize)]
struct DiscoverRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

/// Asks a proxy of `pool` for the current proxy list.
#[derive(Debug, Clone)]
pub struct RpcProxySource {
    pool: Arc<DatacenterPool>,
    role: Option<String>,
    timeout: Duration,
}

impl RpcProxySource {
    pub fn new(pool: Arc<DatacenterPool>, role: Option<String>, timeout: Duration) -> Self {
        Self { pool, role, timeout }
    }

    fn request(&self) -> Result<RpcRequest, DiscoveryError> {
        let body = serde_json::to_vec(&DiscoverRequest {
            kind: "rpc",
            role: self.role.as_deref(),
        })
        .map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        Ok(RpcRequest::new(DISCOVERY_SERVICE, DISCOVER_PROXIES).with_attachment(body))
    }

    async fn fetch_inner(&self) -> Result<Vec<Address>, DiscoveryError> {
        let lease = self
            .pool
            .try_peek()
            .ok_or_else(|| DiscoveryError::NoProxy(self.pool.name().to_string()))?;
        let request = Arc::new(self.request()?);

        let (sink, mut events) = ResponseSink::channel();
        let control = lease.send(request, self.timeout, sink);

        let outcome = time::timeout(self.timeout, async {
            while let Some((_, event)) = events.recv().await {
                match event {
                    SinkEvent::Acknowledged => continue,
                    SinkEvent::Response(attachments) => {
                        let body = attachments
                            .first()
                            .ok_or_else(|| DiscoveryError::Decode("empty response".into()))?;
                        return decode_response(body);
                    }
                    SinkEvent::Error(error) => return Err(DiscoveryError::Rpc(error.to_string())),
                    SinkEvent::Cancelled => break,
                }
            }
            Err(DiscoveryError::Rpc(format!("request to {} was abandoned", lease.address())))
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                control.cancel();
                Err(DiscoveryError::Timeout)
            }
        }
    }
}

impl ProxySource for RpcProxySource {
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Address>, DiscoveryError>> {
        self.fetch_inner().boxed()
    }

    fn describe(&self) -> String {
        match &self.role {
            Some(role) => format!("rpc discovery via '{}' proxies (role {})", self.pool.name(), role),
            None => format!("rpc discovery via '{}' proxies", self.pool.name()),
        }
    }
}
