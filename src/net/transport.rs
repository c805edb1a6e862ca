//! Transport contract consumed by the connection pool.
//!
//! The pool never looks inside requests or responses. A channel accepts an
//! opaque [`RpcRequest`] and reports back through a [`ResponseSink`], which
//! turns the callback-style transport into messages on an mpsc channel owned
//! by whoever issued the attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::net::address::Address;
use crate::net::error::RpcError;

/// A request as seen by the connectivity layer: routing keys plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    /// Fire-and-forget: the call settles on acknowledgement.
    pub one_way: bool,
    /// Serialized request body and attachments.
    pub attachments: Vec<Vec<u8>>,
}

impl RpcRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            one_way: false,
            attachments: Vec::new(),
        }
    }

    /// The lightweight request used by the active pinger.
    pub fn ping() -> Self {
        Self::new("ApiService", "Ping")
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn with_attachment(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.attachments.push(bytes.into());
        self
    }
}

/// What a channel reports about one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Acknowledged,
    Response(Vec<Vec<u8>>),
    Error(RpcError),
    Cancelled,
}

impl SinkEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SinkEvent::Acknowledged)
    }
}

/// Callback invoked for every error an attempt reports, before it is delivered.
pub type ErrorObserver = Arc<dyn Fn(&RpcError) + Send + Sync>;

/// Sender half used by channels to report attempt progress.
///
/// An acknowledgement may precede the terminal event. Exactly one terminal
/// event is delivered: the terminal methods consume the sink, and dropping a
/// sink without calling one reports [`SinkEvent::Cancelled`].
pub struct ResponseSink {
    attempt: usize,
    tx: mpsc::UnboundedSender<(usize, SinkEvent)>,
    observer: Option<ErrorObserver>,
    finished: bool,
}

impl ResponseSink {
    pub fn new(attempt: usize, tx: mpsc::UnboundedSender<(usize, SinkEvent)>) -> Self {
        Self {
            attempt,
            tx,
            observer: None,
            finished: false,
        }
    }

    /// Convenience for single-shot callers (pinger, tests).
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(usize, SinkEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(0, tx), rx)
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub(crate) fn observe_errors(mut self, observer: ErrorObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn acknowledge(&self) {
        let _ = self.tx.send((self.attempt, SinkEvent::Acknowledged));
    }

    pub fn respond(mut self, attachments: Vec<Vec<u8>>) {
        self.finish(SinkEvent::Response(attachments));
    }

    pub fn fail(mut self, error: RpcError) {
        if let Some(observer) = &self.observer {
            observer(&error);
        }
        self.finish(SinkEvent::Error(error));
    }

    pub fn cancelled(mut self) {
        self.finish(SinkEvent::Cancelled);
    }

    fn finish(&mut self, event: SinkEvent) {
        if self.finished {
            return;
        }
        self.finished = true;
        // The receiver is gone once the call settled; late events are dropped.
        let _ = self.tx.send((self.attempt, event));
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        self.finish(SinkEvent::Cancelled);
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("attempt", &self.attempt)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Handle returned by [`RpcChannel::send`]; cancels the in-flight transport call.
pub struct RequestControl {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RequestControl {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A control for transports that cannot cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for RequestControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestControl")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Bidirectional RPC channel to one proxy.
pub trait RpcChannel: Send + Sync {
    /// Start an attempt. `timeout` is the time the caller is still willing to wait.
    fn send(&self, request: Arc<RpcRequest>, timeout: Duration, sink: ResponseSink) -> RequestControl;

    /// Release transport resources. Called at most once by the pool.
    fn close(&self);

    /// Stable name used as a log and metrics key.
    fn destination_name(&self) -> String;
}

/// Opens channels for newly discovered proxies.
pub trait ChannelFactory: Send + Sync {
    fn connect(&self, address: &Address, datacenter: &str) -> Arc<dyn RpcChannel>;
}

impl<F> ChannelFactory for F
where
    F: Fn(&Address, &str) -> Arc<dyn RpcChannel> + Send + Sync,
{
    fn connect(&self, address: &Address, datacenter: &str) -> Arc<dyn RpcChannel> {
        self(address, datacenter)
    }
}
