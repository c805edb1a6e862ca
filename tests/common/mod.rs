//! Shared utilities for integration tests: a scriptable in-memory proxy network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proxy_pool::net::{Address, ChannelFactory, RequestControl, ResponseSink, RpcChannel, RpcError, RpcRequest};

/// How a mock proxy answers every request.
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond { after: Duration, body: Vec<u8> },
    Fail { after: Duration, error: RpcError },
    Silent,
}

impl Behavior {
    pub fn respond(after_ms: u64, body: &str) -> Self {
        Behavior::Respond {
            after: Duration::from_millis(after_ms),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn fail(after_ms: u64, error: RpcError) -> Self {
        Behavior::Fail {
            after: Duration::from_millis(after_ms),
            error,
        }
    }
}

/// Per-address counters.
#[derive(Debug, Default)]
pub struct Stats {
    pub sends: AtomicUsize,
    pub cancels: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    behaviors: Mutex<HashMap<String, Behavior>>,
    stats: Mutex<HashMap<String, Arc<Stats>>>,
}

/// A set of fake proxies keyed by `host:port`. Unknown addresses respond "ok" at once.
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Inner>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, behavior: Behavior) {
        self.inner.behaviors.lock().unwrap().insert(address.to_string(), behavior);
    }

    pub fn stats(&self, address: &str) -> Arc<Stats> {
        self.inner
            .stats
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    pub fn sends(&self, address: &str) -> usize {
        self.stats(address).sends.load(Ordering::SeqCst)
    }

    pub fn cancels(&self, address: &str) -> usize {
        self.stats(address).cancels.load(Ordering::SeqCst)
    }

    pub fn opens(&self, address: &str) -> usize {
        self.stats(address).opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self, address: &str) -> usize {
        self.stats(address).closes.load(Ordering::SeqCst)
    }

    fn behavior(&self, address: &str) -> Behavior {
        self.inner
            .behaviors
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(|| Behavior::respond(0, "ok"))
    }

    pub fn factory(&self) -> impl ChannelFactory + 'static {
        let network = self.clone();
        move |address: &Address, _datacenter: &str| -> Arc<dyn RpcChannel> {
            let key = address.to_string();
            network.stats(&key).opens.fetch_add(1, Ordering::SeqCst);
            Arc::new(MockChannel {
                key: key.clone(),
                network: network.clone(),
                stats: network.stats(&key),
            })
        }
    }
}

struct MockChannel {
    key: String,
    network: MockNetwork,
    stats: Arc<Stats>,
}

impl RpcChannel for MockChannel {
    fn send(&self, _request: Arc<RpcRequest>, _timeout: Duration, sink: ResponseSink) -> RequestControl {
        self.stats.sends.fetch_add(1, Ordering::SeqCst);

        let task = match self.network.behavior(&self.key) {
            Behavior::Respond { after, body } => tokio::spawn(async move {
                tokio::time::sleep(after).await;
                sink.respond(vec![body]);
            }),
            Behavior::Fail { after, error } => tokio::spawn(async move {
                tokio::time::sleep(after).await;
                sink.fail(error);
            }),
            Behavior::Silent => tokio::spawn(async move {
                let _sink = sink;
                std::future::pending::<()>().await;
            }),
        };

        let stats = self.stats.clone();
        RequestControl::new(move || {
            stats.cancels.fetch_add(1, Ordering::SeqCst);
            task.abort();
        })
    }

    fn close(&self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn destination_name(&self) -> String {
        self.key.clone()
    }
}

pub fn addr(raw: &str) -> Address {
    raw.parse().unwrap()
}
