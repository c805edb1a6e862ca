//! A single transport channel bound to one proxy address.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Forward attempts to the underlying channel
//! - Detect unrecoverable errors and report them to the owning pool
//! - Close the channel exactly once

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::net::address::Address;
use crate::net::error::RpcError;
use crate::net::transport::{ErrorObserver, RequestControl, ResponseSink, RpcChannel, RpcRequest};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough, IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Decides whether an attempt error should ban the destination.
pub type BanPredicate = Arc<dyn Fn(&RpcError) -> bool + Send + Sync>;

/// Default ban predicate.
pub fn ban_on_unrecoverable() -> BanPredicate {
    Arc::new(RpcError::is_unrecoverable)
}

/// One transport channel to one proxy.
pub struct Connection {
    id: ConnectionId,
    address: Address,
    datacenter: String,
    channel: Arc<dyn RpcChannel>,
    failure_observer: Option<ErrorObserver>,
    closed: AtomicBool,
    /// Sticky session bound by higher layers; cleared on ban.
    session: Mutex<Option<String>>,
}

impl Connection {
    pub fn new(address: Address, datacenter: impl Into<String>, channel: Arc<dyn RpcChannel>) -> Self {
        Self {
            id: ConnectionId::next(),
            address,
            datacenter: datacenter.into(),
            channel,
            failure_observer: None,
            closed: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    /// Report errors matching `predicate` to `on_failure` as they pass through.
    pub fn with_failure_detector<F>(mut self, predicate: BanPredicate, on_failure: F) -> Self
    where
        F: Fn(&RpcError) + Send + Sync + 'static,
    {
        self.failure_observer = Some(Arc::new(move |error: &RpcError| {
            if predicate(error) {
                on_failure(error);
            }
        }));
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn destination_name(&self) -> String {
        self.channel.destination_name()
    }

    /// Start one attempt on this connection.
    pub fn send(&self, request: Arc<RpcRequest>, timeout: Duration, sink: ResponseSink) -> RequestControl {
        if self.is_closed() {
            sink.fail(RpcError::transport(format!("connection {} is closed", self.id)));
            return RequestControl::noop();
        }
        let sink = match &self.failure_observer {
            Some(observer) => sink.observe_errors(observer.clone()),
            None => sink,
        };
        self.channel.send(request, timeout, sink)
    }

    /// Feed an error noticed above the transport into the failure detector.
    pub fn report_failure(&self, error: &RpcError) {
        if let Some(observer) = &self.failure_observer {
            observer(error);
        }
    }

    /// Close the underlying channel. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!(connection_id = %self.id, address = %self.address, "Closing connection");
        self.channel.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn bind_session(&self, session: impl Into<String>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.into());
    }

    pub fn session(&self) -> Option<String> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset_session(&self) {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("closed", &self.is_closed())
            .finish()
    }
}
