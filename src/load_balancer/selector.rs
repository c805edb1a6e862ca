//! Multi-datacenter selection.
//!
//! # Policy
//! ```text
//! 1. local datacenter has an immediate candidate → take it
//! 2. otherwise poll every datacenter → lowest latency percentile wins
//! 3. otherwise race all pending peeks → first success wins
//! ```
//! Losing leases from step 2 are dropped right away; losing peeks from step 3
//! are cancelled by dropping their futures, so no reference leaks.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;

use crate::health::HealthTracker;
use crate::load_balancer::entry::Lease;
use crate::load_balancer::error::PoolError;
use crate::load_balancer::pool::DatacenterPool;
use crate::net::Address;

/// Picks connections across several datacenter pools.
#[derive(Debug)]
pub struct MultiDcSelector {
    pools: Vec<Arc<DatacenterPool>>,
    local: Option<usize>,
    health: Arc<HealthTracker>,
}

impl MultiDcSelector {
    /// An unknown `local_datacenter` is reported and ignored.
    pub fn new(
        pools: Vec<Arc<DatacenterPool>>,
        local_datacenter: Option<&str>,
        health: Arc<HealthTracker>,
    ) -> Self {
        let local = local_datacenter.and_then(|name| {
            let found = pools.iter().position(|p| p.name() == name);
            if found.is_none() {
                tracing::error!(
                    local_datacenter = %name,
                    known = ?pools.iter().map(|p| p.name()).collect::<Vec<_>>(),
                    "Cannot find local datacenter among configured pools"
                );
            }
            found
        });
        Self { pools, local, health }
    }

    pub fn pools(&self) -> &[Arc<DatacenterPool>] {
        &self.pools
    }

    pub fn pool(&self, name: &str) -> Option<&Arc<DatacenterPool>> {
        self.pools.iter().find(|p| p.name() == name)
    }

    pub fn local_pool(&self) -> Option<&Arc<DatacenterPool>> {
        self.local.map(|i| &self.pools[i])
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Steps 1 and 2 of the policy: never waits.
    pub fn try_peek_client(&self) -> Option<Lease> {
        if let Some(lease) = self.local_pool().and_then(|pool| pool.try_peek()) {
            return Some(lease);
        }

        let mut best: Option<(Lease, f64)> = None;
        for pool in &self.pools {
            let Some(lease) = pool.try_peek() else {
                continue;
            };
            let latency = self.health.datacenter_percentile(pool.name());
            match &best {
                Some((_, best_latency)) if latency >= *best_latency => {}
                // The previous best lease is dropped here.
                _ => best = Some((lease, latency)),
            }
        }
        best.map(|(lease, _)| lease)
    }

    /// Pick one connection, waiting for the first datacenter to produce one
    /// when nothing is available right now.
    pub async fn peek_client(&self) -> Result<Lease, PoolError> {
        if self.pools.is_empty() {
            return Err(PoolError::NoDatacenters);
        }
        if let Some(lease) = self.try_peek_client() {
            return Ok(lease);
        }

        tracing::debug!("No immediate candidates, waiting for the first datacenter");
        let mut pending: FuturesUnordered<_> = self.pools.iter().map(|pool| pool.peek()).collect();
        let mut errors = Vec::with_capacity(self.pools.len());
        while let Some(result) = pending.next().await {
            match result {
                Ok(lease) => return Ok(lease),
                Err(error) => errors.push(error),
            }
        }
        Err(PoolError::AllDatacentersUnavailable(errors))
    }

    /// Pick up to `count` candidates with distinct addresses.
    ///
    /// The first comes from [`peek_client`](Self::peek_client) and may wait;
    /// the rest are only taken if available right now, local datacenter first,
    /// then by ascending latency.
    pub async fn select_candidates(&self, count: usize) -> Result<Vec<Lease>, PoolError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let first = self.peek_client().await?;
        let mut seen: HashSet<Address> = HashSet::from([first.address().clone()]);
        let mut candidates = Vec::with_capacity(count);
        candidates.push(first);

        let mut rng = rand::thread_rng();
        for pool in self.ranked_pools() {
            if candidates.len() >= count {
                break;
            }
            let mut entries = pool.alive_entries().to_vec();
            entries.shuffle(&mut rng);
            for entry in entries {
                if candidates.len() >= count {
                    break;
                }
                if seen.contains(entry.address()) {
                    continue;
                }
                if let Some(lease) = entry.try_lease() {
                    seen.insert(lease.address().clone());
                    candidates.push(lease);
                }
            }
        }
        Ok(candidates)
    }

    /// Local datacenter first, then ascending latency; ties keep configuration order.
    fn ranked_pools(&self) -> Vec<&Arc<DatacenterPool>> {
        let mut ranked: Vec<(usize, f64)> = self
            .pools
            .iter()
            .enumerate()
            .map(|(i, pool)| (i, self.health.datacenter_percentile(pool.name())))
            .collect();
        ranked.sort_by(|(ia, la), (ib, lb)| {
            let a_local = Some(*ia) == self.local;
            let b_local = Some(*ib) == self.local;
            b_local
                .cmp(&a_local)
                .then(la.partial_cmp(lb).unwrap_or(Ordering::Equal))
        });
        ranked.into_iter().map(|(i, _)| &self.pools[i]).collect()
    }
}
