//! Request/response correlation over a shared transport.
//!
//! # Overview
//!
//! Every call made through [`RpcCorrelator::send`]:
//! 1. Draws a fresh UUID request id, unique among outstanding requests.
//! 2. Registers a waiter (match predicate + one-shot result sink) under an
//!    internal token, before anything is written, so a fast reply can never
//!    race past its waiter.
//! 3. Arms a timeout task on the session's task tracker.
//! 4. Writes the frame and hands back a [`PendingCall`].
//!
//! Each waiter is settled exactly once, by whichever comes first:
//!
//! | Event | Outcome |
//! |-------|---------|
//! | matching response | `result` payload, or [`RpcError::Relay`] |
//! | timeout elapses | [`RpcError::Timeout`] |
//! | [`cancel_all`](RpcCorrelator::cancel_all) | [`RpcError::Cancelled`] |
//!
//! Settling removes the waiter from the table under the lock, so the two
//! losing paths find nothing and become no-ops.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::codec::{RequestFrame, ResponseFrame};
use crate::error::{RpcError, RpcResult};
use crate::model::AccountId;
use crate::transport::BoxedTransport;

/// Default time a request may stay unanswered.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Decides whether a response belongs to a waiter.
type ResponsePredicate = Box<dyn Fn(&ResponseFrame) -> bool + Send>;

struct Waiter {
    token: u64,
    request_id: String,
    predicate: ResponsePredicate,
    sink: oneshot::Sender<RpcResult<Value>>,
    timer: Option<AbortHandle>,
}

impl Waiter {
    fn settle(mut self, outcome: RpcResult<Value>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have dropped its PendingCall.
        let _ = self.sink.send(outcome);
    }
}

type WaiterTable = Arc<Mutex<Vec<Waiter>>>;

fn take_waiter(table: &WaiterTable, token: u64) -> Option<Waiter> {
    let mut waiters = table.lock();
    let index = waiters.iter().position(|w| w.token == token)?;
    Some(waiters.remove(index))
}

// =============================================================================
// RpcCorrelator
// =============================================================================

/// Issues requests on a transport and matches replies to callers.
pub struct RpcCorrelator {
    account: AccountId,
    transport: BoxedTransport,
    timeout: Duration,
    next_token: AtomicU64,
    waiters: WaiterTable,
    tracker: TaskTracker,
}

impl RpcCorrelator {
    /// Creates a correlator that tags requests with `account` and spawns its
    /// timeout tasks on `tracker`.
    pub fn new(account: AccountId, transport: BoxedTransport, tracker: TaskTracker) -> Self {
        Self {
            account,
            transport,
            timeout: DEFAULT_RPC_TIMEOUT,
            next_token: AtomicU64::new(1),
            waiters: Arc::new(Mutex::new(Vec::new())),
            tracker,
        }
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The account every request is sent as.
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests still waiting for an outcome.
    pub fn pending_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Sends `method` with `params` and returns a handle to its outcome.
    ///
    /// `params` gains an `account` member. The returned future fails only
    /// when the frame could not be written; relay errors and timeouts are
    /// reported by the [`PendingCall`].
    pub async fn send(&self, method: &str, mut params: Map<String, Value>) -> RpcResult<PendingCall> {
        let request_id = self.fresh_request_id();
        params.insert("account".into(), Value::from(self.account.as_str()));
        let frame = RequestFrame::new(request_id.clone(), method, params);

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sink, receiver) = oneshot::channel();
        let expected = request_id.clone();
        self.waiters.lock().push(Waiter {
            token,
            request_id: request_id.clone(),
            predicate: Box::new(move |response| response.answers(&expected)),
            sink,
            timer: None,
        });
        self.arm_timeout(token);

        debug!(request_id = %request_id, method = %method, "Sending RPC request");
        if let Err(e) = self.transport.write(&frame).await {
            if let Some(mut waiter) = take_waiter(&self.waiters, token)
                && let Some(timer) = waiter.timer.take()
            {
                timer.abort();
            }
            return Err(e.into());
        }

        Ok(PendingCall {
            request_id,
            receiver,
        })
    }

    /// Settles the waiter matching `frame`.
    ///
    /// Returns `false` when no waiter matched, which happens when the reply
    /// arrives after its request already timed out.
    pub fn handle_response(&self, frame: ResponseFrame) -> bool {
        let matched = {
            let mut waiters = self.waiters.lock();
            let index = waiters.iter().position(|w| (w.predicate)(&frame));
            index.map(|i| waiters.remove(i))
        };

        let Some(waiter) = matched else {
            trace!(id = ?frame.id, "Dropping response with no waiting request");
            return false;
        };

        trace!(request_id = %waiter.request_id, "Resolving RPC request");
        let outcome = frame
            .outcome
            .map_err(|(error, body)| RpcError::Relay {
                code: error.code,
                message: error.message,
                body,
            });
        waiter.settle(outcome);
        true
    }

    /// Fails every outstanding request with [`RpcError::Cancelled`].
    ///
    /// Returns how many requests were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Waiter> = std::mem::take(&mut *self.waiters.lock());
        let count = drained.len();
        for waiter in drained {
            waiter.settle(Err(RpcError::Cancelled));
        }
        if count > 0 {
            debug!(count, "Cancelled outstanding RPC requests");
        }
        count
    }

    fn fresh_request_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.waiters.lock().iter().any(|w| w.request_id == id) {
                return id;
            }
        }
    }

    fn arm_timeout(&self, token: u64) {
        let waiters = Arc::clone(&self.waiters);
        let timeout = self.timeout;
        let handle = self.tracker.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(mut waiter) = take_waiter(&waiters, token) {
                waiter.timer = None;
                warn!(request_id = %waiter.request_id, "RPC request timed out");
                let request_id = waiter.request_id.clone();
                waiter.settle(Err(RpcError::Timeout { request_id }));
            }
        });

        if let Some(waiter) = self.waiters.lock().iter_mut().find(|w| w.token == token) {
            waiter.timer = Some(handle.abort_handle());
        }
    }
}

// =============================================================================
// PendingCall
// =============================================================================

/// Outcome of one sent request.
///
/// Resolves to the response's `result` (`null` when the relay sent none).
/// Dropping it does not cancel the request; the waiter is still settled and
/// the outcome discarded.
#[derive(Debug)]
pub struct PendingCall {
    request_id: String,
    receiver: oneshot::Receiver<RpcResult<Value>>,
}

impl PendingCall {
    /// Id the request was sent with.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for PendingCall {
    type Output = RpcResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{TransportError, TransportResult};
    use crate::transport::{FrameHandler, Transport};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::codec::ErrorObject;

    /// Transport that records written frames.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) written: Mutex<Vec<RequestFrame>>,
        pub(crate) fail_writes: bool,
    }

    impl RecordingTransport {
        pub(crate) fn last(&self) -> RequestFrame {
            self.written.lock().last().cloned().expect("no frame written")
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn scheme(&self) -> &'static str {
            "test"
        }

        async fn write(&self, frame: &RequestFrame) -> TransportResult<()> {
            if self.fail_writes {
                return Err(TransportError::closed("test"));
            }
            self.written.lock().push(frame.clone());
            Ok(())
        }

        async fn listen(
            &self,
            _handler: Arc<dyn FrameHandler>,
            cancel: CancellationToken,
        ) -> TransportResult<()> {
            cancel.cancelled().await;
            Ok(())
        }

        async fn terminate(&self) -> TransportResult<()> {
            Ok(())
        }
    }

    fn correlator(transport: Arc<RecordingTransport>) -> RpcCorrelator {
        RpcCorrelator::new(AccountId::new("+10000000000"), transport, TaskTracker::new())
    }

    fn reply(id: &str, outcome: Result<Value, (ErrorObject, Value)>) -> ResponseFrame {
        ResponseFrame {
            id: Some(id.to_string()),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_response_resolves_pending_call() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let pending = rpc.send("listGroups", Map::new()).await.unwrap();
        let frame = transport.last();
        assert_eq!(frame.id, pending.request_id());
        assert_eq!(frame.params["account"], "+10000000000");

        assert!(rpc.handle_response(reply(&frame.id, Ok(json!([1, 2])))));
        assert_eq!(pending.await.unwrap(), json!([1, 2]));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_until_answered() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let mut pending = tokio_test::task::spawn(rpc.send("version", Map::new()).await.unwrap());
        tokio_test::assert_pending!(pending.poll());

        rpc.handle_response(reply(&transport.last().id, Ok(json!({"version": "0.13"}))));
        assert!(pending.is_woken());
        let outcome = tokio_test::assert_ready!(pending.poll());
        assert_eq!(outcome.unwrap()["version"], "0.13");
    }

    #[tokio::test]
    async fn test_request_ids_are_distinct() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let a = rpc.send("a", Map::new()).await.unwrap();
        let b = rpc.send("b", Map::new()).await.unwrap();
        assert_ne!(a.request_id(), b.request_id());

        // Replies in reverse order still reach the right caller.
        rpc.handle_response(reply(b.request_id(), Ok(json!("b"))));
        rpc.handle_response(reply(a.request_id(), Ok(json!("a"))));
        assert_eq!(a.await.unwrap(), json!("a"));
        assert_eq!(b.await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_error_response_maps_to_relay_error() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let pending = rpc.send("send", Map::new()).await.unwrap();
        let body = json!({"code": -1, "message": "Unregistered user"});
        let error = ErrorObject {
            code: -1,
            message: "Unregistered user".into(),
            data: None,
        };
        rpc.handle_response(reply(pending.request_id(), Err((error, body.clone()))));

        match pending.await {
            Err(RpcError::Relay {
                code,
                message,
                body: raw,
            }) => {
                assert_eq!(code, -1);
                assert_eq!(message, "Unregistered user");
                assert_eq!(raw, body);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let pending = rpc.send("send", Map::new()).await.unwrap();
        let id = pending.request_id().to_string();

        match pending.await {
            Err(RpcError::Timeout { request_id }) => assert_eq!(request_id, id),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(rpc.pending_count(), 0);

        // A reply arriving after the timeout is dropped.
        assert!(!rpc.handle_response(reply(&id, Ok(json!({})))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_request_does_not_time_out_later() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let pending = rpc.send("send", Map::new()).await.unwrap();
        rpc.handle_response(reply(pending.request_id(), Ok(Value::Null)));
        assert_eq!(pending.await.unwrap(), Value::Null);

        tokio::time::sleep(DEFAULT_RPC_TIMEOUT * 2).await;
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_settles_every_waiter_once() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let a = rpc.send("a", Map::new()).await.unwrap();
        let b = rpc.send("b", Map::new()).await.unwrap();
        let a_id = a.request_id().to_string();

        assert_eq!(rpc.cancel_all(), 2);
        assert_eq!(rpc.cancel_all(), 0);
        assert!(matches!(a.await, Err(RpcError::Cancelled)));
        assert!(matches!(b.await, Err(RpcError::Cancelled)));
        assert!(!rpc.handle_response(reply(&a_id, Ok(Value::Null))));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = correlator(Arc::clone(&transport));

        let pending = rpc.send("a", Map::new()).await.unwrap();
        assert!(!rpc.handle_response(reply("someone-else", Ok(Value::Null))));
        assert_eq!(rpc.pending_count(), 1);
        rpc.handle_response(reply(pending.request_id(), Ok(Value::Null)));
        assert!(pending.await.is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_unregisters_waiter() {
        let transport = Arc::new(RecordingTransport {
            fail_writes: true,
            ..Default::default()
        });
        let rpc = correlator(transport);

        let result = rpc.send("send", Map::new()).await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert_eq!(rpc.pending_count(), 0);
    }
}
