//! Failover request execution.
//!
//! # Responsibilities
//! - Drive one logical call across an ordered list of candidates
//! - Enforce the global deadline and the per-attempt failover timer
//! - Settle exactly once and cancel every losing attempt
//!
//! # Data Flow
//! ```text
//! execute(request, candidates)
//!     → spawned call task owns the leases
//!     → ResponseSink events arrive over mpsc (attempt index, event)
//!     → select! { cancel, events, global deadline, failover timer }
//!     → result delivered through a oneshot to the CallHandle
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::health::HealthTracker;
use crate::load_balancer::Lease;
use crate::net::{RequestControl, ResponseSink, RpcError, RpcRequest, SinkEvent};
use crate::observability::metrics;
use crate::resilience::error::CallError;
use crate::resilience::policy::FailoverPolicy;

/// Response attachments on success; empty for one-way requests.
pub type CallResult = Result<Vec<Vec<u8>>, CallError>;

/// Timing budget of a logical call.
#[derive(Debug, Clone)]
pub struct FailoverOptions {
    pub global_timeout: Duration,
    /// Time an attempt gets before the next candidate is tried in parallel.
    pub failover_timeout: Duration,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            global_timeout: Duration::from_secs(60),
            failover_timeout: Duration::from_secs(30),
        }
    }
}

/// Spawns failover executions of logical calls.
pub struct FailoverExecutor {
    policy: Arc<dyn FailoverPolicy>,
    options: FailoverOptions,
    health: Option<Arc<HealthTracker>>,
}

impl FailoverExecutor {
    pub fn new(policy: Arc<dyn FailoverPolicy>, options: FailoverOptions) -> Self {
        Self {
            policy,
            options,
            health: None,
        }
    }

    /// Record the latency of successful attempts into `health`.
    pub fn with_health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn options(&self) -> &FailoverOptions {
        &self.options
    }

    /// Start a logical call over `candidates`, tried in order.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn execute(&self, request: Arc<RpcRequest>, candidates: Vec<Lease>) -> CallHandle {
        self.execute_until(request, candidates, Instant::now() + self.options.global_timeout)
    }

    /// Like [`execute`](Self::execute), but the call settles with a timeout at
    /// `deadline`, for callers that already spent part of the budget.
    pub fn execute_until(&self, request: Arc<RpcRequest>, candidates: Vec<Lease>, deadline: Instant) -> CallHandle {
        let id = Uuid::new_v4();
        let cancel = Arc::new(CancelSignal::default());
        let (result_tx, result_rx) = oneshot::channel();

        let call = Call {
            id,
            request,
            policy: self.policy.clone(),
            health: self.health.clone(),
            options: self.options.clone(),
            deadline,
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            let result = call.run(candidates).await;
            // The caller may have dropped the handle; the result is discarded then.
            let _ = result_tx.send(result);
        });

        CallHandle {
            id,
            result: result_rx,
            canceller: CallCanceller(cancel),
        }
    }
}

/// Awaitable result of a logical call.
///
/// Dropping the handle does not cancel the call.
pub struct CallHandle {
    id: Uuid,
    result: oneshot::Receiver<CallResult>,
    canceller: CallCanceller,
}

impl CallHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the call. No-op once it settled; safe to call repeatedly.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// A cloneable handle for cancelling from another task.
    pub fn canceller(&self) -> CallCanceller {
        self.canceller.clone()
    }
}

impl Future for CallHandle {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::Cancelled)))
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle").field("id", &self.id).finish()
    }
}

#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    wake: Notify,
}

impl CancelSignal {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct CallCanceller(Arc<CancelSignal>);

impl CallCanceller {
    /// No attempt is sent after this returns.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
        // A stored permit is picked up even if the call task is between polls.
        self.0.wake.notify_one();
    }
}

struct Attempt {
    /// Held until the attempt finishes or the call settles.
    lease: Option<Lease>,
    control: Option<RequestControl>,
    started: Instant,
}

impl Attempt {
    fn in_flight(&self) -> bool {
        self.lease.is_some()
    }

    fn finish(&mut self) {
        if self.lease.take().is_some() {
            self.control = None;
            metrics::attempt_finished();
        }
    }

    fn cancel(&mut self) {
        if let Some(control) = self.control.take() {
            control.cancel();
        }
        self.finish();
    }
}

#[derive(Default)]
struct CallState {
    pending: VecDeque<Lease>,
    attempts: Vec<Attempt>,
    last_error: Option<RpcError>,
}

impl CallState {
    fn in_flight(&self) -> usize {
        self.attempts.iter().filter(|a| a.in_flight()).count()
    }
}

enum Step {
    Wait,
    Failover(Instant),
    Settle(CallResult),
}

struct Call {
    id: Uuid,
    request: Arc<RpcRequest>,
    policy: Arc<dyn FailoverPolicy>,
    health: Option<Arc<HealthTracker>>,
    options: FailoverOptions,
    deadline: Instant,
    cancel: Arc<CancelSignal>,
}

impl Call {
    async fn run(self, candidates: Vec<Lease>) -> CallResult {
        let deadline = self.deadline;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut state = CallState {
            pending: candidates.into(),
            ..CallState::default()
        };

        let result = if self.cancel.is_cancelled() {
            Err(CallError::Cancelled)
        } else if state.pending.is_empty() {
            Err(CallError::Exhausted {
                attempts: 0,
                last: None,
            })
        } else {
            match self.send_next(&mut state, &events_tx, deadline) {
                Err(error) => Err(error),
                Ok(timer) => {
                    self.drive(&mut state, &mut events, &events_tx, deadline, timer)
                        .await
                }
            }
        };

        for attempt in &mut state.attempts {
            attempt.cancel();
        }
        state.pending.clear();

        let outcome = match &result {
            Ok(_) => "success",
            Err(error) => error.kind().as_str(),
        };
        metrics::record_call(outcome);
        tracing::debug!(
            call_id = %self.id,
            service = %self.request.service,
            method = %self.request.method,
            attempts = state.attempts.len(),
            outcome,
            "Call settled"
        );
        result
    }

    async fn drive(
        &self,
        state: &mut CallState,
        events: &mut mpsc::UnboundedReceiver<(usize, SinkEvent)>,
        events_tx: &mpsc::UnboundedSender<(usize, SinkEvent)>,
        deadline: Instant,
        first_timer: Instant,
    ) -> CallResult {
        let mut attempt_timer = Some(first_timer);
        loop {
            let timer = attempt_timer.unwrap_or(deadline);
            tokio::select! {
                biased;

                _ = self.cancel.wake.notified() => {
                    tracing::debug!(call_id = %self.id, "Call cancelled");
                    return Err(CallError::Cancelled);
                }
                Some((index, event)) = events.recv() => {
                    match self.on_event(state, index, event, events_tx, deadline) {
                        Step::Wait => {}
                        Step::Failover(next) => attempt_timer = Some(next),
                        Step::Settle(result) => return result,
                    }
                }
                _ = sleep_until(deadline) => {
                    return Err(CallError::Timeout(self.options.global_timeout));
                }
                _ = sleep_until(timer), if attempt_timer.is_some() => {
                    if state.pending.is_empty() {
                        // Nothing left to fail over to; wait for the running attempts.
                        attempt_timer = None;
                    } else if !self.policy.on_timeout() {
                        return Err(CallError::Timeout(self.options.global_timeout));
                    } else {
                        match self.send_next(state, events_tx, deadline) {
                            Ok(next) => attempt_timer = Some(next),
                            Err(error) => return Err(error),
                        }
                    }
                }
            }
        }
    }

    /// Send the request to the next pending candidate and return when its failover timer fires.
    fn send_next(
        &self,
        state: &mut CallState,
        events_tx: &mpsc::UnboundedSender<(usize, SinkEvent)>,
        deadline: Instant,
    ) -> Result<Instant, CallError> {
        if self.cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let now = Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return Err(CallError::Timeout(self.options.global_timeout));
        }
        let Some(lease) = state.pending.pop_front() else {
            return Err(CallError::Exhausted {
                attempts: state.attempts.len(),
                last: state.last_error.take(),
            });
        };

        let index = state.attempts.len();
        if index > 0 {
            metrics::record_failover();
            tracing::debug!(
                call_id = %self.id,
                attempt = index,
                address = %lease.address(),
                datacenter = %lease.datacenter(),
                "Failing over to next candidate"
            );
        }
        metrics::attempt_started();

        let sink = ResponseSink::new(index, events_tx.clone());
        let control = lease.send(self.request.clone(), remaining, sink);
        state.attempts.push(Attempt {
            lease: Some(lease),
            control: Some(control),
            started: now,
        });

        Ok(deadline.min(now + self.options.failover_timeout))
    }

    fn on_event(
        &self,
        state: &mut CallState,
        index: usize,
        event: SinkEvent,
        events_tx: &mpsc::UnboundedSender<(usize, SinkEvent)>,
        deadline: Instant,
    ) -> Step {
        let Some(attempt) = state.attempts.get_mut(index) else {
            return Step::Wait;
        };
        if !attempt.in_flight() {
            return Step::Wait;
        }

        match event {
            SinkEvent::Acknowledged if self.request.one_way => {
                attempt.finish();
                Step::Settle(Ok(Vec::new()))
            }
            SinkEvent::Acknowledged => Step::Wait,
            SinkEvent::Response(_) if self.request.one_way => {
                let error = RpcError::protocol("server replied to a one-way request");
                if let Some(lease) = &attempt.lease {
                    tracing::warn!(
                        call_id = %self.id,
                        address = %lease.address(),
                        "Proxy replied to a one-way request"
                    );
                    lease.report_failure(&error);
                }
                attempt.finish();
                Step::Settle(Err(CallError::ProtocolViolation(error.message)))
            }
            SinkEvent::Response(attachments) => {
                if let Some(lease) = &attempt.lease {
                    let elapsed = attempt.started.elapsed();
                    if let Some(health) = &self.health {
                        health.record_latency(lease.datacenter(), &lease.destination_name(), elapsed);
                    }
                    metrics::record_attempt_duration(lease.datacenter(), elapsed);
                }
                attempt.finish();
                Step::Settle(Ok(attachments))
            }
            SinkEvent::Error(error) => {
                let retriable = self.policy.on_error(&self.request, &error);
                self.on_failure(state, index, error, retriable, events_tx, deadline)
            }
            // The transport gave up on the attempt without an error.
            SinkEvent::Cancelled => {
                let error = RpcError::cancelled();
                let retriable = self.policy.on_error(&self.request, &error);
                self.on_failure(state, index, error, retriable, events_tx, deadline)
            }
        }
    }

    fn on_failure(
        &self,
        state: &mut CallState,
        index: usize,
        error: RpcError,
        retriable: bool,
        events_tx: &mpsc::UnboundedSender<(usize, SinkEvent)>,
        deadline: Instant,
    ) -> Step {
        state.attempts[index].finish();
        tracing::debug!(call_id = %self.id, attempt = index, error = %error, retriable, "Attempt failed");

        if !retriable {
            return Step::Settle(Err(CallError::Rpc(error)));
        }
        state.last_error = Some(error);

        let active = index + 1 == state.attempts.len();
        if active && !state.pending.is_empty() {
            return match self.send_next(state, events_tx, deadline) {
                Ok(timer) => Step::Failover(timer),
                Err(error) => Step::Settle(Err(error)),
            };
        }
        if state.pending.is_empty() && state.in_flight() == 0 {
            return Step::Settle(Err(CallError::Exhausted {
                attempts: state.attempts.len(),
                last: state.last_error.take(),
            }));
        }
        Step::Wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{DatacenterPool, PoolOptions};
    use crate::net::connection::ban_on_unrecoverable;
    use crate::net::{Address, ErrorCode, RpcChannel};
    use crate::resilience::policy::DefaultFailoverPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// What a scripted channel does with each request.
    #[derive(Clone)]
    enum Script {
        Respond,
        Fail(ErrorCode),
        Acknowledge,
        AcknowledgeThenRespond,
        Silent,
        /// Drop the sink without an outcome.
        Abandon,
    }

    #[derive(Default)]
    struct Counters {
        sends: AtomicUsize,
        cancels: AtomicUsize,
    }

    struct ScriptChannel {
        script: Script,
        counters: Arc<Counters>,
        // Silent attempts keep their sink here so no Cancelled event is sent.
        parked: Mutex<Vec<ResponseSink>>,
    }

    impl RpcChannel for ScriptChannel {
        fn send(&self, _: Arc<RpcRequest>, _: Duration, sink: ResponseSink) -> RequestControl {
            self.counters.sends.fetch_add(1, Ordering::SeqCst);
            match self.script.clone() {
                Script::Respond => sink.respond(vec![b"payload".to_vec()]),
                Script::Fail(code) => sink.fail(RpcError::new(code, "scripted failure")),
                Script::Acknowledge => {
                    sink.acknowledge();
                    self.parked.lock().unwrap().push(sink);
                }
                Script::AcknowledgeThenRespond => {
                    sink.acknowledge();
                    sink.respond(Vec::new());
                }
                Script::Silent => self.parked.lock().unwrap().push(sink),
                Script::Abandon => drop(sink),
            }
            let counters = self.counters.clone();
            RequestControl::new(move || {
                counters.cancels.fetch_add(1, Ordering::SeqCst);
            })
        }
        fn close(&self) {}
        fn destination_name(&self) -> String {
            "scripted".into()
        }
    }

    fn candidates(scripts: &[Script]) -> (Arc<DatacenterPool>, Vec<Lease>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let by_port: Vec<Script> = scripts.to_vec();
        let c = counters.clone();
        let factory = move |address: &Address, _: &str| -> Arc<dyn RpcChannel> {
            Arc::new(ScriptChannel {
                script: by_port[address.port() as usize].clone(),
                counters: c.clone(),
                parked: Mutex::new(Vec::new()),
            })
        };
        let options = PoolOptions {
            max_size: scripts.len(),
            update_wait: Duration::from_secs(1),
        };
        let pool = DatacenterPool::new("dc", options, Arc::new(factory), ban_on_unrecoverable());
        let addresses: Vec<Address> = (0..scripts.len()).map(|i| Address::new("p", i as u16)).collect();
        pool.update_roster(addresses.clone());

        let leases = addresses
            .iter()
            .map(|a| {
                pool.alive_entries()
                    .iter()
                    .find(|e| e.address() == a)
                    .and_then(|e| e.try_lease())
                    .unwrap()
            })
            .collect();
        (pool, leases, counters)
    }

    fn executor(global_ms: u64, failover_ms: u64) -> FailoverExecutor {
        FailoverExecutor::new(
            Arc::new(DefaultFailoverPolicy),
            FailoverOptions {
                global_timeout: Duration::from_millis(global_ms),
                failover_timeout: Duration::from_millis(failover_ms),
            },
        )
    }

    fn request() -> Arc<RpcRequest> {
        Arc::new(RpcRequest::new("ApiService", "LookupRows"))
    }

    #[tokio::test]
    async fn empty_candidate_list_is_exhausted() {
        let result = executor(1000, 100).execute(request(), Vec::new()).await;
        assert!(matches!(result, Err(CallError::Exhausted { attempts: 0, .. })));
    }

    #[tokio::test]
    async fn first_response_wins() {
        let (_pool, leases, _) = candidates(&[Script::Respond, Script::Respond]);
        let result = executor(1000, 100).execute(request(), leases).await;
        assert_eq!(result.unwrap(), vec![b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn retriable_error_fails_over_immediately() {
        let (_pool, leases, _) = candidates(&[Script::Fail(ErrorCode::Transport), Script::Respond]);
        let result = executor(1000, 500).execute(request(), leases).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn all_retriable_errors_exhaust_candidates() {
        let (_pool, leases, _) = candidates(&[Script::Fail(ErrorCode::Unavailable), Script::Fail(ErrorCode::Transport)]);
        match executor(1000, 500).execute(request(), leases).await {
            Err(error @ CallError::Exhausted { attempts: 2, .. }) => {
                assert!(error.to_string().contains("scripted failure"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_retriable_error_settles_without_failover() {
        let (_pool, leases, _) = candidates(&[Script::Fail(ErrorCode::Server), Script::Respond]);
        let result = executor(1000, 500).execute(request(), leases).await;
        assert!(matches!(result, Err(CallError::Rpc(RpcError { code: ErrorCode::Server, .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fails_over_and_cancels_loser() {
        let (_pool, leases, counters) = candidates(&[Script::Silent, Script::Respond]);
        let started = Instant::now();
        let result = executor(1000, 100).execute(request(), leases).await;
        assert!(result.is_ok());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(110));
        assert_eq!(counters.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_candidates_time_out_within_budget() {
        let (_pool, leases, counters) = candidates(&[Script::Silent, Script::Silent, Script::Silent, Script::Silent]);
        let started = Instant::now();
        let result = executor(250, 100).execute(request(), leases).await;
        assert!(matches!(result, Err(CallError::Timeout(_))));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(260));
        // ceil(250 / 100) attempts were sent, each one cancelled at settlement.
        assert_eq!(counters.cancels.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_way_settles_on_acknowledgement() {
        let (_pool, leases, _) = candidates(&[Script::Acknowledge]);
        let request = Arc::new(RpcRequest::new("ApiService", "ModifyRows").one_way());
        let result = executor(1000, 100).execute(request, leases).await;
        assert_eq!(result.unwrap(), Vec::<Vec<u8>>::new());
    }

    #[tokio::test]
    async fn response_to_one_way_request_is_protocol_violation() {
        let (pool, leases, _) = candidates(&[Script::Respond]);
        let request = Arc::new(RpcRequest::new("ApiService", "ModifyRows").one_way());
        let result = executor(1000, 100).execute(request, leases).await;
        assert!(matches!(result, Err(CallError::ProtocolViolation(_))));
        assert!(pool.alive_addresses().is_empty());
    }

    #[tokio::test]
    async fn acknowledgement_is_ignored_for_two_way_requests() {
        let (_pool, leases, _) = candidates(&[Script::AcknowledgeThenRespond]);
        let result = executor(1000, 100).execute(request(), leases).await;
        assert_eq!(result.unwrap(), Vec::<Vec<u8>>::new());
    }

    #[tokio::test]
    async fn cancel_settles_cancelled_and_cancels_attempts() {
        let (_pool, leases, counters) = candidates(&[Script::Silent]);
        let handle = executor(60_000, 30_000).execute(request(), leases);
        handle.cancel();
        handle.cancel();
        assert!(matches!(handle.await, Err(CallError::Cancelled)));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 0);
        assert_eq!(counters.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_flight_stops_further_attempts() {
        let (_pool, leases, counters) = candidates(&[Script::Silent, Script::Respond]);
        let handle = executor(60_000, 100).execute(request(), leases);
        let canceller = handle.canceller();

        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();

        assert!(matches!(handle.await, Err(CallError::Cancelled)));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 1);
        assert_eq!(counters.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_is_shared_with_the_caller() {
        let (_pool, leases, counters) = candidates(&[Script::Respond]);
        let result = executor(60_000, 100).execute_until(request(), leases, Instant::now()).await;
        assert!(matches!(result, Err(CallError::Timeout(_))));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 0);
    }

    struct NoRetryOnCancel;

    impl FailoverPolicy for NoRetryOnCancel {
        fn on_error(&self, _: &RpcRequest, error: &RpcError) -> bool {
            error.code != ErrorCode::Cancelled && error.is_retriable()
        }
    }

    #[tokio::test]
    async fn abandoned_attempt_goes_through_the_policy() {
        let (_pool, leases, _) = candidates(&[Script::Abandon, Script::Respond]);
        let result = executor(1000, 500).execute(request(), leases).await;
        assert_eq!(result.unwrap(), vec![b"payload".to_vec()]);

        let (_pool, leases, counters) = candidates(&[Script::Abandon, Script::Respond]);
        let strict = FailoverExecutor::new(
            Arc::new(NoRetryOnCancel),
            FailoverOptions {
                global_timeout: Duration::from_secs(1),
                failover_timeout: Duration::from_millis(500),
            },
        );
        let result = strict.execute(request(), leases).await;
        assert!(matches!(result, Err(CallError::Rpc(RpcError { code: ErrorCode::Cancelled, .. }))));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leases_are_released_after_settlement() {
        let (pool, leases, _) = candidates(&[Script::Silent, Script::Respond]);
        let entries = pool.alive_entries();
        let handle = executor(1000, 1).execute(request(), leases);
        assert!(handle.await.is_ok());
        for entry in entries.iter() {
            assert_eq!(entry.ref_count(), 1);
        }
    }
}
