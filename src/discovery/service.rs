//! Periodic proxy discovery for one datacenter.
//!
//! # Responsibilities
//! - Query the address source on a fixed schedule
//! - Feed results (or failures) into the owning pool
//! - Stop idempotently, cancelling the pending tick and closing the source

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::discovery::source::ProxySource;
use crate::discovery::DiscoveryError;
use crate::load_balancer::pool::{DatacenterPool, RosterDiff};
use crate::observability::metrics;

/// Schedule of one discovery loop.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub refresh_period: Duration,
    /// Upper bound on one fetch, whatever the source does.
    pub fetch_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct LoopState {
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

/// Keeps one datacenter pool's roster in sync with its address source.
pub struct DiscoveryService {
    pool: Arc<DatacenterPool>,
    source: Arc<dyn ProxySource>,
    options: DiscoveryOptions,
    state: Mutex<LoopState>,
}

impl DiscoveryService {
    pub fn new(pool: Arc<DatacenterPool>, source: Arc<dyn ProxySource>, options: DiscoveryOptions) -> Self {
        Self {
            pool,
            source,
            options,
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn pool(&self) -> &Arc<DatacenterPool> {
        &self.pool
    }

    /// Spawn the discovery loop. The first round runs immediately.
    ///
    /// Calling `start` on a running service does nothing; a stopped service
    /// cannot be restarted.
    pub fn start(&self) -> Result<(), DiscoveryError> {
        let mut state = self.lock_state();
        if state.stopped {
            return Err(DiscoveryError::Stopped);
        }
        if state.task.is_some() {
            return Ok(());
        }

        tracing::info!(
            datacenter = %self.pool.name(),
            source = %self.source.describe(),
            refresh_period_ms = self.options.refresh_period.as_millis() as u64,
            "Proxy discovery starting"
        );

        let pool = self.pool.clone();
        let source = self.source.clone();
        let options = self.options.clone();
        state.task = Some(tokio::spawn(async move {
            loop {
                let _ = discover_once(&pool, source.as_ref(), options.fetch_timeout).await;
                tokio::time::sleep(options.refresh_period).await;
            }
        }));
        Ok(())
    }

    /// Run a single round right now, outside the schedule.
    pub async fn refresh(&self) -> Result<RosterDiff, DiscoveryError> {
        if self.lock_state().stopped {
            return Err(DiscoveryError::Stopped);
        }
        discover_once(&self.pool, self.source.as_ref(), self.options.fetch_timeout).await
    }

    /// Cancel the loop and close the source. Safe to call repeatedly.
    pub fn stop(&self) {
        let task = {
            let mut state = self.lock_state();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.task.take()
        };

        // Aborting drops an in-flight fetch or sleep at its next await point.
        if let Some(task) = task {
            task.abort();
        }
        self.source.close();
        tracing::info!(datacenter = %self.pool.name(), "Proxy discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        let state = self.lock_state();
        !state.stopped && state.task.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn discover_once(
    pool: &DatacenterPool,
    source: &dyn ProxySource,
    fetch_timeout: Duration,
) -> Result<RosterDiff, DiscoveryError> {
    let result = match tokio::time::timeout(fetch_timeout, source.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(DiscoveryError::Timeout),
    };

    match result {
        Ok(addresses) => {
            tracing::debug!(
                datacenter = %pool.name(),
                count = addresses.len(),
                "Discovered rpc proxies"
            );
            metrics::record_discovery(pool.name(), "ok");
            Ok(pool.update_roster(addresses))
        }
        Err(error) => {
            tracing::warn!(
                datacenter = %pool.name(),
                error = %error,
                "Failed to discover rpc proxies"
            );
            metrics::record_discovery(pool.name(), "error");
            pool.update_failed(error.clone());
            Err(error)
        }
    }
}
