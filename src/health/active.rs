//! Active health checking.
//!
//! # Responsibilities
//! - Periodically ping every alive proxy
//! - Feed round-trip latency into the health tracker
//!
//! Fatal ping errors ban the proxy through the connection's failure
//! detector, like errors of ordinary calls.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::health::tracker::HealthTracker;
use crate::load_balancer::{DatacenterPool, Lease};
use crate::net::{ErrorCode, ResponseSink, RpcError, RpcRequest, SinkEvent};

/// Background pinger over a set of datacenter pools.
pub struct Pinger {
    pools: Vec<Arc<DatacenterPool>>,
    health: Arc<HealthTracker>,
    interval: Duration,
    timeout: Duration,
}

impl Pinger {
    pub fn new(
        pools: Vec<Arc<DatacenterPool>>,
        health: Arc<HealthTracker>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            pools,
            health,
            interval,
            timeout,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Pinger starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.ping_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pinger received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Ping every alive proxy once, concurrently. Returns the number of successful pings.
    pub async fn ping_all(&self) -> usize {
        let mut pending: FuturesUnordered<_> = self
            .pools
            .iter()
            .flat_map(|pool| pool.alive_entries().iter().filter_map(|e| e.try_lease()).collect::<Vec<_>>())
            .map(|lease| self.ping_and_record(lease))
            .collect();

        let mut healthy = 0;
        while let Some(ok) = pending.next().await {
            if ok {
                healthy += 1;
            }
        }
        healthy
    }

    async fn ping_and_record(&self, lease: Lease) -> bool {
        match ping(&lease, self.timeout).await {
            Ok(elapsed) => {
                self.health
                    .record_latency(lease.datacenter(), &lease.destination_name(), elapsed);
                true
            }
            Err(error) => {
                tracing::warn!(
                    datacenter = %lease.datacenter(),
                    address = %lease.address(),
                    error = %error,
                    "Ping failed"
                );
                false
            }
        }
    }
}

/// Send one ping over `lease` and wait for its response.
pub async fn ping(lease: &Lease, timeout: Duration) -> Result<Duration, RpcError> {
    let (sink, mut events) = ResponseSink::channel();
    let started = Instant::now();
    let control = lease.send(Arc::new(RpcRequest::ping()), timeout, sink);

    let outcome = time::timeout(timeout, async {
        while let Some((_, event)) = events.recv().await {
            match event {
                SinkEvent::Acknowledged => continue,
                SinkEvent::Response(_) => return Ok(started.elapsed()),
                SinkEvent::Error(error) => return Err(error),
                SinkEvent::Cancelled => break,
            }
        }
        Err(RpcError::cancelled())
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            control.cancel();
            Err(RpcError::new(ErrorCode::Timeout, "ping timed out"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::PoolOptions;
    use crate::net::connection::ban_on_unrecoverable;
    use crate::net::{Address, RequestControl, RpcChannel};

    /// Answers pings for `healthy` hosts, fails the rest with a fatal error.
    struct PingChannel {
        healthy: bool,
        host: String,
    }

    impl RpcChannel for PingChannel {
        fn send(&self, _: Arc<RpcRequest>, _: Duration, sink: ResponseSink) -> RequestControl {
            if self.healthy {
                sink.respond(Vec::new());
            } else {
                sink.fail(RpcError::new(ErrorCode::Authentication, "bad token"));
            }
            RequestControl::noop()
        }
        fn close(&self) {}
        fn destination_name(&self) -> String {
            self.host.clone()
        }
    }

    fn pool() -> Arc<DatacenterPool> {
        let factory = |address: &Address, _: &str| -> Arc<dyn RpcChannel> {
            Arc::new(PingChannel {
                healthy: address.host() != "sick",
                host: address.host().to_string(),
            })
        };
        DatacenterPool::new("dc", PoolOptions::default(), Arc::new(factory), ban_on_unrecoverable())
    }

    #[tokio::test]
    async fn ping_records_latency_and_bans_fatal_failures() {
        let pool = pool();
        pool.update_roster([Address::new("fine", 1), Address::new("sick", 1)]);
        let health = Arc::new(HealthTracker::default());
        let pinger = Pinger::new(vec![pool.clone()], health.clone(), Duration::from_secs(5), Duration::from_secs(1));

        assert_eq!(pinger.ping_all().await, 1);
        assert_eq!(pool.alive_addresses(), vec![Address::new("fine", 1)]);
        assert!(health.snapshot().destinations.contains_key("fine"));
        assert!(health.snapshot().datacenters.contains_key("dc"));
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let pinger = Pinger::new(
            vec![pool()],
            Arc::new(HealthTracker::default()),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let task = tokio::spawn(pinger.run(rx));
        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
