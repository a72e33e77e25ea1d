//! Request correlation.
//!
//! Tracks one waiter per in-flight request id and settles it exactly once,
//! whichever of response, transport failure or teardown comes first. Every
//! piece of per-id state is removed in the same step that settles it, so late
//! or duplicate responses find nothing and are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::dispatch::{DispatchEvent, ResponseEvent};
use crate::error::{McpError, Result};
use crate::protocol::{Reply, Request, RequestId};

/// One-shot callback fired when a response for the request arrives.
pub type ReplyCallback = Box<dyn FnOnce(&Reply) + Send>;

struct Pending {
    method: String,
    waiter: oneshot::Sender<Result<Reply>>,
    callback: Option<ReplyCallback>,
}

/// Map of in-flight requests to their waiters.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<RequestId, Pending>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a request.
    ///
    /// Fails with [`McpError::AlreadyInProgress`] when the id is already pending.
    pub fn register(&self, request: &Request, callback: Option<ReplyCallback>) -> Result<ResponseFuture> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&request.id) {
            return Err(McpError::AlreadyInProgress(request.id.clone()));
        }
        let (waiter, receiver) = oneshot::channel();
        pending.insert(
            request.id.clone(),
            Pending {
                method: request.method.clone(),
                waiter,
                callback,
            },
        );
        Ok(ResponseFuture::pending(receiver))
    }

    /// Feed a dispatched event.
    pub fn handle_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Response(event) => self.handle_response(event),
            DispatchEvent::ConnectionLost(lost) => {
                let rejected = self.reject_all(|| {
                    McpError::aborted_early(&lost.reason, lost.diagnostics.clone())
                });
                if rejected > 0 {
                    tracing::warn!(rejected, reason = %lost.reason, "rejected pending requests after connection loss");
                }
            }
        }
    }

    /// Settle the waiter matching a response, if any.
    pub fn handle_response(&self, event: &ResponseEvent) {
        let Some(reply) = &event.reply else {
            return;
        };
        let Some(pending) = self.pending.lock().remove(&reply.id) else {
            tracing::debug!(id = %reply.id, "dropping response with no pending request");
            return;
        };

        tracing::debug!(id = %reply.id, method = %pending.method, error = reply.is_error(), "received response");
        if let Some(callback) = pending.callback {
            callback(reply);
        }
        let _ = pending.waiter.send(Ok(reply.clone()));
    }

    /// Reject one pending request. Returns false if it had already settled.
    pub fn fail(&self, id: &RequestId, err: McpError) -> bool {
        match self.pending.lock().remove(id) {
            Some(pending) => {
                let _ = pending.waiter.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with a freshly built error.
    pub fn reject_all(&self, make_error: impl Fn() -> McpError) -> usize {
        let drained: Vec<(RequestId, Pending)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(id = %id, method = %pending.method, "rejecting pending request");
            let _ = pending.waiter.send(Err(make_error()));
        }
        count
    }

    /// Whether a request with this id is in flight.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Number of requests in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Future resolving to the reply for one request.
#[must_use = "futures do nothing unless awaited"]
pub struct ResponseFuture {
    state: FutureState,
}

enum FutureState {
    Pending(oneshot::Receiver<Result<Reply>>),
    Failed(Option<McpError>),
}

impl ResponseFuture {
    fn pending(receiver: oneshot::Receiver<Result<Reply>>) -> Self {
        Self {
            state: FutureState::Pending(receiver),
        }
    }

    /// A future that is already rejected.
    pub fn failed(err: McpError) -> Self {
        Self {
            state: FutureState::Failed(Some(err)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Reply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            FutureState::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                // Waiter dropped without settling: the correlator went away.
                Poll::Ready(Err(_)) => Poll::Ready(Err(McpError::ConnectionClosed)),
                Poll::Pending => Poll::Pending,
            },
            FutureState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(McpError::ConnectionClosed)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::dispatch::{Dispatcher, RawResultFactory, ResultFactory};

    fn response_event(message: serde_json::Value) -> ResponseEvent {
        ResponseEvent {
            reply: RawResultFactory.build(&message, None),
            request: None,
            message,
        }
    }

    #[tokio::test]
    async fn test_settles_once() {
        let correlator = Correlator::new();
        let request = Request::new("ping", None).with_id("1");
        let future = correlator.register(&request, None).unwrap();

        correlator.handle_response(&response_event(json!({"id": "1", "result": {"n": 1}})));
        correlator.handle_response(&response_event(json!({"id": "1", "result": {"n": 2}})));

        let reply = future.await.unwrap();
        assert_eq!(reply.result(), Some(&json!({"n": 1})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let correlator = Correlator::new();
        let request = Request::new("ping", None).with_id("dup");
        let _first = correlator.register(&request, None).unwrap();
        let err = correlator.register(&request, None).err().unwrap();
        assert!(matches!(err, McpError::AlreadyInProgress(_)));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_callback_fires_before_future() {
        let correlator = Correlator::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let future = correlator
            .register(
                &Request::new("ping", None).with_id("cb"),
                Some(Box::new(move |reply: &Reply| {
                    assert_eq!(reply.id.as_str(), "cb");
                    h.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        correlator.handle_response(&response_event(json!({"id": "cb", "result": {}})));
        future.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reject_all_and_late_response() {
        let correlator = Correlator::new();
        let a = correlator.register(&Request::new("a", None), None).unwrap();
        let b = correlator.register(&Request::new("b", None), None).unwrap();

        assert_eq!(correlator.reject_all(|| McpError::ConnectionClosed), 2);
        assert!(matches!(a.await, Err(McpError::ConnectionClosed)));
        assert!(matches!(b.await, Err(McpError::ConnectionClosed)));

        // Nothing left to settle.
        correlator.handle_response(&response_event(json!({"id": "a", "result": {}})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_is_noop_after_settlement() {
        let correlator = Correlator::new();
        let request = Request::new("ping", None).with_id("f");
        let future = correlator.register(&request, None).unwrap();
        correlator.handle_response(&response_event(json!({"id": "f", "result": {}})));
        assert!(!correlator.fail(&request.id, McpError::NotConnected));
        assert!(future.await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_lost_event_aborts_pending() {
        let correlator = Arc::new(Correlator::new());
        let dispatcher = Dispatcher::new();
        let c = correlator.clone();
        dispatcher.add_listener(move |event| c.handle_event(event));

        let future = correlator.register(&Request::new("ping", None), None).unwrap();
        dispatcher.dispatch_connection_lost("process exited", vec!["panic: boom".into()]);

        let err = future.await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionAbortedEarly { .. }));
        assert!(err.to_string().contains("panic: boom"));
    }

    #[tokio::test]
    async fn test_failed_future() {
        let err = ResponseFuture::failed(McpError::NotConnected).await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected));
    }
}
