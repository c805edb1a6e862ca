//! Cluster client: the explicit owner of every pool and background task.
//!
//! # Responsibilities
//! - Build one pool and one discovery loop per configured datacenter
//! - Share one health tracker between the selector, the executor and the pinger
//! - Turn a request into a failover execution over selected candidates
//! - Start and stop background work in order

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{validate_config, ClientConfig, ConfigError};
use crate::discovery::{self, DiscoveryError, DiscoveryOptions, DiscoveryService, ProxySource};
use crate::health::{HealthTracker, Pinger};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{DatacenterPool, MultiDcSelector, PoolOptions};
use crate::net::connection::ban_on_unrecoverable;
use crate::net::{Address, BanPredicate, ChannelFactory, RpcError, RpcRequest};
use crate::resilience::{
    CallError, CallHandle, CallResult, DefaultFailoverPolicy, FailoverExecutor, FailoverOptions, FailoverPolicy,
};

/// Errors building or starting a [`ClusterClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no channel factory configured")]
    MissingChannelFactory,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("datacenter '{datacenter}': {source}")]
    Discovery {
        datacenter: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("client is closed")]
    Closed,
}

/// Builder for [`ClusterClient`].
pub struct ClusterClientBuilder {
    config: ClientConfig,
    factory: Option<Arc<dyn ChannelFactory>>,
    ban_predicate: BanPredicate,
    policy: Arc<dyn FailoverPolicy>,
    sources: HashMap<String, Arc<dyn ProxySource>>,
}

impl ClusterClientBuilder {
    /// Transport used to open a channel to each discovered proxy.
    pub fn channel_factory(mut self, factory: impl ChannelFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Which attempt errors ban the proxy that produced them.
    pub fn ban_predicate(mut self, predicate: impl Fn(&RpcError) -> bool + Send + Sync + 'static) -> Self {
        self.ban_predicate = Arc::new(predicate);
        self
    }

    pub fn failover_policy(mut self, policy: impl FailoverPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Replace the configured address source of one datacenter.
    pub fn proxy_source(mut self, datacenter: impl Into<String>, source: impl ProxySource + 'static) -> Self {
        self.sources.insert(datacenter.into(), Arc::new(source));
        self
    }

    pub fn build(mut self) -> Result<ClusterClient, ClientError> {
        validate_config(&self.config).map_err(|errors| ClientError::Config(ConfigError::Validation(errors)))?;
        let factory = self.factory.take().ok_or(ClientError::MissingChannelFactory)?;
        let config = self.config;

        let health = Arc::new(HealthTracker::new(config.health.latency_window, config.health.quantile));
        let pool_options = PoolOptions {
            max_size: config.pool.max_size,
            // A peeker waits through one full discovery round.
            update_wait: config.discovery.refresh_period() + config.discovery.fetch_timeout(),
        };
        let discovery_options = DiscoveryOptions {
            refresh_period: config.discovery.refresh_period(),
            fetch_timeout: config.discovery.fetch_timeout(),
        };

        let mut pools = Vec::with_capacity(config.datacenters.len());
        let mut services = Vec::with_capacity(config.datacenters.len());
        for dc in &config.datacenters {
            let pool = DatacenterPool::new(
                dc.name.clone(),
                pool_options.clone(),
                factory.clone(),
                self.ban_predicate.clone(),
            );

            let initial =
                discovery::source::parse_addresses(&dc.initial_proxies).map_err(|source| ClientError::Discovery {
                    datacenter: dc.name.clone(),
                    source,
                })?;
            if !initial.is_empty() {
                pool.update_roster(initial);
            }

            let source = match self.sources.remove(&dc.name) {
                Some(source) => source,
                None => discovery::source_from_config(&dc.source, discovery_options.fetch_timeout, Some(&pool))
                    .map_err(|source| ClientError::Discovery {
                        datacenter: dc.name.clone(),
                        source,
                    })?,
            };

            services.push(DiscoveryService::new(pool.clone(), source, discovery_options.clone()));
            pools.push(pool);
        }

        let selector = MultiDcSelector::new(pools, config.local_datacenter.as_deref(), health.clone());
        let executor = FailoverExecutor::new(
            self.policy,
            FailoverOptions {
                global_timeout: config.timeouts.global(),
                failover_timeout: config.timeouts.failover(),
            },
        )
        .with_health(health.clone());

        tracing::info!(
            datacenters = config.datacenters.len(),
            local_datacenter = ?config.local_datacenter,
            fan_out = config.balancing.fan_out,
            "Cluster client built"
        );

        Ok(ClusterClient {
            config,
            selector,
            executor,
            services,
            health,
            shutdown: Shutdown::new(),
            state: Mutex::new(ClientState::default()),
        })
    }
}

#[derive(Default)]
struct ClientState {
    started: bool,
    closed: bool,
    pinger: Option<JoinHandle<()>>,
}

/// Connectivity to one cluster: pools, discovery, selection and failover.
pub struct ClusterClient {
    config: ClientConfig,
    selector: MultiDcSelector,
    executor: FailoverExecutor,
    services: Vec<DiscoveryService>,
    health: Arc<HealthTracker>,
    shutdown: Shutdown,
    state: Mutex<ClientState>,
}

impl ClusterClient {
    pub fn builder(config: ClientConfig) -> ClusterClientBuilder {
        ClusterClientBuilder {
            config,
            factory: None,
            ban_predicate: ban_on_unrecoverable(),
            policy: Arc::new(DefaultFailoverPolicy),
            sources: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn selector(&self) -> &MultiDcSelector {
        &self.selector
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Launch discovery loops and, when enabled, the pinger. Idempotent.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(ClientError::Closed);
        }
        if state.started {
            return Ok(());
        }

        for service in &self.services {
            service.start().map_err(|source| ClientError::Discovery {
                datacenter: service.pool().name().to_string(),
                source,
            })?;
        }

        let health = &self.config.health;
        if health.ping_enabled {
            let pinger = Pinger::new(
                self.selector.pools().to_vec(),
                self.health.clone(),
                Duration::from_millis(health.ping_interval_ms),
                Duration::from_millis(health.ping_timeout_ms),
            );
            state.pinger = Some(tokio::spawn(pinger.run(self.shutdown.subscribe())));
        }

        state.started = true;
        tracing::info!("Cluster client started");
        Ok(())
    }

    /// Select candidates and start a logical call over them.
    ///
    /// The global timeout covers both waiting for a first candidate and the
    /// failover execution.
    pub async fn call(&self, request: RpcRequest) -> Result<CallHandle, CallError> {
        if self.is_closed() {
            return Err(CallError::Closed);
        }

        let global = self.executor.options().global_timeout;
        let deadline = Instant::now() + global;
        let candidates =
            tokio::time::timeout_at(deadline, self.selector.select_candidates(self.config.balancing.fan_out))
                .await
                .map_err(|_| CallError::Timeout(global))??;

        Ok(self.executor.execute_until(Arc::new(request), candidates, deadline))
    }

    /// [`call`](Self::call) and wait for the result.
    pub async fn execute(&self, request: RpcRequest) -> CallResult {
        self.call(request).await?.await
    }

    /// Selectable proxies per datacenter.
    pub fn alive_destinations(&self) -> BTreeMap<String, Vec<Address>> {
        self.selector
            .pools()
            .iter()
            .map(|pool| (pool.name().to_string(), pool.alive_addresses()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Stop discovery and pings, then close every pool. Idempotent.
    pub fn close(&self) {
        let pinger = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return;
            }
            state.closed = true;
            state.pinger.take()
        };

        for service in &self.services {
            service.stop();
        }
        self.shutdown.trigger();
        if let Some(pinger) = pinger {
            // The pinger exits on the signal; abort covers a ping round in progress.
            pinger.abort();
        }
        for pool in self.selector.pools() {
            pool.close();
        }
        tracing::info!("Cluster client closed");
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        self.close();
    }
}
