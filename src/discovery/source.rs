//! Address source contract.

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::discovery::DiscoveryError;
use crate::net::Address;

/// Something that can list the proxies currently advertised for a datacenter.
///
/// Called on a fixed schedule; failures are ordinary and retried next round.
pub trait ProxySource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Address>, DiscoveryError>>;

    /// Release clients held by the source. Called once when discovery stops.
    fn close(&self) {}

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// A fixed proxy list.
#[derive(Debug, Clone)]
pub struct StaticProxySource {
    proxies: Vec<Address>,
}

impl StaticProxySource {
    pub fn new(proxies: Vec<Address>) -> Self {
        Self { proxies }
    }

    /// Parse `host:port` strings; fails on the first bad entry.
    pub fn parse<S: AsRef<str>>(proxies: &[S]) -> Result<Self, DiscoveryError> {
        parse_addresses(proxies).map(Self::new)
    }
}

impl ProxySource for StaticProxySource {
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Address>, DiscoveryError>> {
        future::ready(Ok(self.proxies.clone())).boxed()
    }

    fn describe(&self) -> String {
        format!("static list of {} proxies", self.proxies.len())
    }
}

pub(crate) fn parse_addresses<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Address>, DiscoveryError> {
    raw.iter()
        .map(|s| {
            let s = s.as_ref().trim();
            s.parse::<Address>()
                .map_err(|_| DiscoveryError::InvalidAddress(s.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_its_list() {
        let source = StaticProxySource::parse(&["p1:9013", "p2:9013"]).unwrap();
        let proxies = source.fetch().await.unwrap();
        assert_eq!(proxies, vec![Address::new("p1", 9013), Address::new("p2", 9013)]);
    }

    #[test]
    fn bad_entry_is_reported() {
        match StaticProxySource::parse(&["p1:9013", "no-port"]) {
            Err(DiscoveryError::InvalidAddress(s)) => assert_eq!(s, "no-port"),
            other => panic!("unexpected: {:?}", other.map(|s| s.describe())),
        }
    }
}
