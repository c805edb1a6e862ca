//! HTTP balancer discovery.
//!
//! Queries `GET /api/v4/discover_proxies?type=rpc[&role=R]` on the cluster's
//! HTTP balancer and expects `{"proxies": ["host:port", ...]}`.

use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use url::Url;

use crate::discovery::source::{parse_addresses, ProxySource};
use crate::discovery::DiscoveryError;
use crate::net::Address;

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    #[serde(default)]
    proxies: Vec<String>,
}

/// Discovery through the cluster HTTP balancer.
#[derive(Debug, Clone)]
pub struct HttpProxySource {
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
}

impl HttpProxySource {
    pub fn new(
        balancer: &str,
        role: Option<&str>,
        token: Option<String>,
        use_tls: bool,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let url = discovery_url(balancer, role, use_tls)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Http(e.to_string()))?;
        Ok(Self { client, url, token })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch_inner(&self) -> Result<Vec<Address>, DiscoveryError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("OAuth {}", token));
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        decode_response(&body)
    }
}

impl ProxySource for HttpProxySource {
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Address>, DiscoveryError>> {
        self.fetch_inner().boxed()
    }

    fn describe(&self) -> String {
        // The token is never logged.
        self.url.to_string()
    }
}

fn discovery_url(balancer: &str, role: Option<&str>, use_tls: bool) -> Result<Url, DiscoveryError> {
    let scheme = if use_tls { "https" } else { "http" };
    let mut url = Url::parse(&format!("{}://{}/api/v4/discover_proxies", scheme, balancer))
        .map_err(|e| DiscoveryError::InvalidAddress(format!("{}: {}", balancer, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("type", "rpc");
        if let Some(role) = role {
            query.append_pair("role", role);
        }
    }
    Ok(url)
}

fn map_reqwest_error(error: reqwest::Error) -> DiscoveryError {
    if error.is_timeout() {
        DiscoveryError::Timeout
    } else {
        DiscoveryError::Http(error.to_string())
    }
}

pub(crate) fn decode_response(body: &[u8]) -> Result<Vec<Address>, DiscoveryError> {
    let response: DiscoverResponse =
        serde_json::from_slice(body).map_err(|e| DiscoveryError::Decode(e.to_string()))?;
    parse_addresses(&response.proxies)
}
