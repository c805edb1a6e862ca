//! Datacenter pool management.
//!
//! # Responsibilities
//! - Own the pooled entries for one datacenter
//! - Hand out leases on a uniformly random alive entry
//! - Reconcile membership with discovered rosters
//! - Ban entries on failure and drain them
//!
//! # Concurrency
//! Writers (roster updates, bans, close) serialize on one mutex and publish a
//! freshly built snapshot through `ArcSwap`. Readers only ever load the
//! snapshot, so `try_peek` never blocks on a writer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::Rng;
use tokio::sync::watch;

use crate::discovery::DiscoveryError;
use crate::load_balancer::entry::{Lease, PooledEntry};
use crate::load_balancer::error::PoolError;
use crate::net::{Address, BanPredicate, ChannelFactory, Connection, ConnectionId, RpcError};
use crate::observability::metrics;

/// Tuning knobs for a single datacenter pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of proxies kept in the roster.
    pub max_size: usize,
    /// How long `peek` waits for the next roster update before giving up.
    pub update_wait: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 3,
            update_wait: Duration::from_secs(70),
        }
    }
}

/// Outcome of one roster reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
    /// New addresses left out because the pool was full.
    pub skipped: usize,
}

/// Last signal published to waiting peekers.
#[derive(Debug, Clone)]
enum RosterSignal {
    Idle,
    Updated,
    Failed(Arc<DiscoveryError>),
    Closed,
}

/// Writer-side state, only touched under the mutex.
#[derive(Default)]
struct RosterState {
    entries: HashMap<Address, Arc<PooledEntry>>,
    closed: bool,
}

/// The set of proxy connections for one datacenter.
pub struct DatacenterPool {
    name: String,
    options: PoolOptions,
    factory: Arc<dyn ChannelFactory>,
    ban_predicate: BanPredicate,
    /// Published snapshot of non-banned entries.
    cache: ArcSwap<Vec<Arc<PooledEntry>>>,
    writer: Mutex<RosterState>,
    updates: watch::Sender<RosterSignal>,
    this: Weak<DatacenterPool>,
}

impl DatacenterPool {
    /// Create an empty pool.
    pub fn new(
        name: impl Into<String>,
        options: PoolOptions,
        factory: Arc<dyn ChannelFactory>,
        ban_predicate: BanPredicate,
    ) -> Arc<Self> {
        let (updates, _) = watch::channel(RosterSignal::Idle);
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            options,
            factory,
            ban_predicate,
            cache: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(RosterState::default()),
            updates,
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Lease a random alive connection if one is available right now.
    pub fn try_peek(&self) -> Option<Lease> {
        // Two rounds: the second one only if a writer republished meanwhile.
        for _ in 0..2 {
            let snapshot = self.cache.load_full();
            if snapshot.is_empty() {
                return None;
            }

            let start = rand::thread_rng().gen_range(0..snapshot.len());
            for i in 0..snapshot.len() {
                let entry = &snapshot[(start + i) % snapshot.len()];
                if let Some(lease) = entry.try_lease() {
                    return Some(lease);
                }
            }

            if Arc::ptr_eq(&snapshot, &*self.cache.load()) {
                return None;
            }
        }
        None
    }

    /// Lease a connection, waiting for the next roster update if the pool is empty.
    ///
    /// Fails with [`PoolError::Exhausted`] if the update does not bring any
    /// alive proxy (or does not arrive within `update_wait`).
    pub async fn peek(&self) -> Result<Lease, PoolError> {
        // Subscribe before looking so an update landing in between is not missed.
        let mut updates = self.updates.subscribe();
        if let Some(lease) = self.try_peek() {
            return Ok(lease);
        }
        if let RosterSignal::Closed = *updates.borrow() {
            return Err(PoolError::Closed {
                datacenter: self.name.clone(),
            });
        }

        tracing::debug!(datacenter = %self.name, "No alive proxies, waiting for roster update");
        let signal = match tokio::time::timeout(self.options.update_wait, updates.changed()).await {
            Ok(Ok(())) => updates.borrow_and_update().clone(),
            Ok(Err(_)) => RosterSignal::Closed,
            Err(_) => RosterSignal::Idle,
        };

        if let Some(lease) = self.try_peek() {
            return Ok(lease);
        }

        Err(match signal {
            RosterSignal::Closed => PoolError::Closed {
                datacenter: self.name.clone(),
            },
            RosterSignal::Failed(cause) => PoolError::Exhausted {
                datacenter: self.name.clone(),
                cause: Some(cause),
            },
            RosterSignal::Idle | RosterSignal::Updated => PoolError::Exhausted {
                datacenter: self.name.clone(),
                cause: None,
            },
        })
    }

    /// Reconcile membership with a freshly discovered address set.
    ///
    /// Missing addresses are banned, new ones get a connection (up to `max_size`),
    /// everything else is left untouched.
    pub fn update_roster<I>(&self, addresses: I) -> RosterDiff
    where
        I: IntoIterator<Item = Address>,
    {
        let mut wanted: HashSet<Address> = addresses.into_iter().collect();
        let mut diff = RosterDiff::default();
        let mut released = Vec::new();

        {
            let mut state = self.lock_writer();
            if state.closed {
                return diff;
            }

            let stale: Vec<Address> = state
                .entries
                .keys()
                .filter(|address| !wanted.remove(*address))
                .cloned()
                .collect();
            for address in stale {
                if let Some(entry) = self.ban_locked(&mut state, &address, "proxy was removed from the list") {
                    released.push(entry);
                    diff.removed.push(address);
                }
            }

            let mut fresh: Vec<Address> = wanted.into_iter().collect();
            fresh.sort();
            for address in fresh {
                if state.entries.len() >= self.options.max_size {
                    diff.skipped += 1;
                    continue;
                }
                let entry = Arc::new(PooledEntry::new(self.open_connection(&address)));
                state.entries.insert(address.clone(), entry);
                diff.added.push(address);
            }

            self.publish_locked(&state);
        }

        for entry in released {
            entry.unref();
        }

        if !diff.added.is_empty() || !diff.removed.is_empty() {
            tracing::info!(
                datacenter = %self.name,
                added = diff.added.len(),
                removed = diff.removed.len(),
                skipped = diff.skipped,
                "Roster updated"
            );
        }
        self.updates.send_replace(RosterSignal::Updated);
        diff
    }

    /// Tell waiting peekers that discovery failed this round.
    pub fn update_failed(&self, error: DiscoveryError) {
        if self.lock_writer().closed {
            return;
        }
        self.updates.send_replace(RosterSignal::Failed(Arc::new(error)));
    }

    /// Ban the current entry for `address`. No-op if it is unknown or already banned.
    pub fn ban(&self, address: &Address, reason: &str) -> bool {
        self.ban_matching(address, None, reason)
    }

    /// Ban `address` only if it is still served by connection `id`.
    fn ban_connection(&self, address: &Address, id: ConnectionId, error: &RpcError) {
        tracing::warn!(
            datacenter = %self.name,
            address = %address,
            connection_id = %id,
            error = %error,
            "Proxy is banned due to error"
        );
        self.ban_matching(address, Some(id), &error.to_string());
    }

    fn ban_matching(&self, address: &Address, id: Option<ConnectionId>, reason: &str) -> bool {
        let released = {
            let mut state = self.lock_writer();
            let matches = match (state.entries.get(address), id) {
                (Some(entry), Some(id)) => entry.connection().id() == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return false;
            }
            let released = self.ban_locked(&mut state, address, reason);
            self.publish_locked(&state);
            released
        };

        match released {
            Some(entry) => {
                entry.unref();
                true
            }
            None => false,
        }
    }

    /// Remove an entry from the roster and mark it banned.
    ///
    /// The caller publishes the new snapshot and then drops the membership
    /// reference (outside the lock, closing may call back into the transport).
    fn ban_locked(&self, state: &mut RosterState, address: &Address, reason: &str) -> Option<Arc<PooledEntry>> {
        let entry = state.entries.remove(address)?;
        if !entry.mark_banned() {
            return None;
        }
        entry.connection().reset_session();
        metrics::record_ban(&self.name);
        tracing::info!(datacenter = %self.name, address = %address, reason = %reason, "Proxy banned");
        Some(entry)
    }

    fn publish_locked(&self, state: &RosterState) {
        let mut alive: Vec<Arc<PooledEntry>> = state.entries.values().cloned().collect();
        alive.sort_by(|a, b| a.address().cmp(b.address()));
        metrics::record_alive_proxies(&self.name, alive.len());
        self.cache.store(Arc::new(alive));
    }

    fn open_connection(&self, address: &Address) -> Connection {
        let channel = self.factory.connect(address, &self.name);
        let connection = Connection::new(address.clone(), self.name.clone(), channel);
        let id = connection.id();
        let pool = self.this.clone();
        let banned = address.clone();
        connection.with_failure_detector(self.ban_predicate.clone(), move |error| {
            if let Some(pool) = pool.upgrade() {
                pool.ban_connection(&banned, id, error);
            }
        })
    }

    /// Addresses currently eligible for selection.
    pub fn alive_addresses(&self) -> Vec<Address> {
        self.cache.load().iter().map(|e| e.address().clone()).collect()
    }

    /// Entries currently eligible for selection.
    pub fn alive_entries(&self) -> Arc<Vec<Arc<PooledEntry>>> {
        self.cache.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_writer().closed
    }

    /// Ban everything and fail pending and future peeks.
    pub fn close(&self) {
        let released: Vec<Arc<PooledEntry>> = {
            let mut state = self.lock_writer();
            if state.closed {
                return;
            }
            state.closed = true;
            let addresses: Vec<Address> = state.entries.keys().cloned().collect();
            let released = addresses
                .iter()
                .filter_map(|address| self.ban_locked(&mut state, address, "pool closed"))
                .collect();
            self.publish_locked(&state);
            released
        };

        for entry in released {
            entry.unref();
        }
        self.updates.send_replace(RosterSignal::Closed);
        tracing::info!(datacenter = %self.name, "Pool closed");
    }

    fn lock_writer(&self) -> MutexGuard<'_, RosterState> {
        // Every critical section leaves the state consistent, so a poisoned lock is usable.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DatacenterPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatacenterPool")
            .field("name", &self.name)
            .field("alive", &self.cache.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ban_on_unrecoverable;
    use crate::net::{RequestControl, ResponseSink, RpcChannel, RpcRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullChannel {
        closes: Arc<AtomicUsize>,
    }

    impl RpcChannel for NullChannel {
        fn send(&self, _: Arc<RpcRequest>, _: Duration, sink: ResponseSink) -> RequestControl {
            sink.respond(Vec::new());
            RequestControl::noop()
        }
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        fn destination_name(&self) -> String {
            "null".into()
        }
    }

    fn pool(max_size: usize) -> (Arc<DatacenterPool>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        let factory = move |_: &Address, _: &str| -> Arc<dyn RpcChannel> {
            Arc::new(NullChannel { closes: c.clone() })
        };
        let options = PoolOptions {
            max_size,
            update_wait: Duration::from_millis(200),
        };
        (
            DatacenterPool::new("dc-a", options, Arc::new(factory), ban_on_unrecoverable()),
            closes,
        )
    }

    fn addr(port: u16) -> Address {
        Address::new("10.0.0.1", port)
    }

    #[test]
    fn empty_pool_has_no_immediate_candidate() {
        let (pool, _) = pool(3);
        assert!(pool.try_peek().is_none());
    }

    #[test]
    fn roster_respects_max_size() {
        let (pool, _) = pool(2);
        let diff = pool.update_roster([addr(1), addr(2), addr(3)]);
        assert_eq!(diff.added.len(), 2);
        assert_eq!(diff.skipped, 1);
        assert_eq!(pool.alive_addresses().len(), 2);
    }

    #[test]
    fn ban_excludes_address_from_selection() {
        let (pool, closes) = pool(3);
        pool.update_roster([addr(1), addr(2)]);

        assert!(pool.ban(&addr(1), "test"));
        assert!(!pool.ban(&addr(1), "test"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        for _ in 0..50 {
            let lease = pool.try_peek().unwrap();
            assert_eq!(lease.address(), &addr(2));
        }
    }

    #[test]
    fn readded_address_gets_fresh_entry() {
        let (pool, _) = pool(3);
        pool.update_roster([addr(1)]);
        let old_id = pool.try_peek().unwrap().id();

        pool.update_roster([addr(2)]);
        pool.update_roster([addr(1), addr(2)]);

        let ids: HashSet<ConnectionId> = (0..50)
            .filter_map(|_| pool.try_peek())
            .filter(|l| l.address() == &addr(1))
            .map(|l| l.id())
            .collect();
        assert_eq!(ids.len(), 1);
        assert!(!ids.contains(&old_id));
    }

    #[test]
    fn stale_failure_report_does_not_ban_replacement() {
        let (pool, _) = pool(3);
        pool.update_roster([addr(1)]);
        let old = pool.try_peek().unwrap();
        let old_id = old.id();
        drop(old);

        pool.update_roster(Vec::<Address>::new());
        pool.update_roster([addr(1)]);

        pool.ban_connection(&addr(1), old_id, &RpcError::protocol("late"));
        assert_eq!(pool.alive_addresses(), vec![addr(1)]);
    }

    #[tokio::test]
    async fn peek_waits_for_roster_update() {
        let (pool, _) = pool(3);
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.peek().await.map(|l| l.address().clone()) })
        };
        tokio::task::yield_now().await;
        pool.update_roster([addr(7)]);
        assert_eq!(waiter.await.unwrap().unwrap(), addr(7));
    }

    #[tokio::test]
    async fn peek_fails_with_discovery_cause() {
        let (pool, _) = pool(3);
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.peek().await })
        };
        tokio::task::yield_now().await;
        pool.update_failed(DiscoveryError::Status(502));
        match waiter.await.unwrap() {
            Err(PoolError::Exhausted { cause: Some(cause), .. }) => {
                assert!(cause.to_string().contains("502"));
            }
            other => panic!("unexpected result: {:?}", other.map(|l| l.address().clone())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn peek_never_hangs_without_updates() {
        let (pool, _) = pool(3);
        let result = pool.peek().await;
        assert!(matches!(result, Err(PoolError::Exhausted { cause: None, .. })));
    }

    #[tokio::test]
    async fn closed_pool_fails_peek() {
        let (pool, closes) = pool(3);
        pool.update_roster([addr(1), addr(2)]);
        pool.close();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.peek().await, Err(PoolError::Closed { .. })));
        assert!(pool.update_roster([addr(3)]).added.is_empty());
    }
}
