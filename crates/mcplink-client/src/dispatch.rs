//! Inbound message dispatch.
//!
//! Every transporter hands each decoded inbound message to a [`Dispatcher`],
//! which turns it into a [`ResponseEvent`] through a [`ResultFactory`] and
//! fans it out to the registered listeners. There is no filtering or
//! backpressure at this layer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::protocol::{JsonRpcError, Reply, Request, RequestId};

/// Builds a typed reply out of a raw inbound message.
pub trait ResultFactory: Send + Sync {
    /// Produce a reply keyed by the originating request id, or `None` when
    /// the message is not a response (notifications, server-initiated requests).
    fn build(&self, message: &Value, request: Option<&Request>) -> Option<Reply>;
}

/// Factory that keeps the result payload as raw JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawResultFactory;

impl ResultFactory for RawResultFactory {
    fn build(&self, message: &Value, request: Option<&Request>) -> Option<Reply> {
        let id = RequestId::from_message(message)?;
        let method = request.map(|r| r.method.clone());

        if let Some(error) = message.get("error") {
            let error = serde_json::from_value::<JsonRpcError>(error.clone()).unwrap_or_else(|_| {
                JsonRpcError {
                    code: JsonRpcError::INTERNAL_ERROR,
                    message: "malformed error object".to_string(),
                    data: Some(error.clone()),
                }
            });
            return Some(Reply {
                id,
                method,
                outcome: Err(error),
            });
        }

        let result = message.get("result")?;
        Some(Reply {
            id,
            method,
            outcome: Ok(result.clone()),
        })
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    /// The message exactly as decoded from the wire.
    pub message: Value,
    /// The request this message answers, when the transporter still had it.
    pub request: Option<Request>,
    /// The typed reply, if the message is a response.
    pub reply: Option<Reply>,
}

/// The physical channel died while it was believed to be connected.
#[derive(Debug, Clone)]
pub struct ConnectionLost {
    /// What happened.
    pub reason: String,
    /// Recent diagnostic output from the peer.
    pub diagnostics: Vec<String>,
}

/// The single event type observed by listeners.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A decoded inbound message.
    Response(ResponseEvent),
    /// The channel was lost.
    ConnectionLost(ConnectionLost),
}

/// Handle returned by [`Dispatcher::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&DispatchEvent) + Send + Sync>;

struct DispatcherInner {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    factory: Arc<dyn ResultFactory>,
}

/// Cloneable registry of listeners for [`DispatchEvent`]s.
///
/// Clones share the same listener list.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher using [`RawResultFactory`].
    pub fn new() -> Self {
        Self::with_factory(Arc::new(RawResultFactory))
    }

    /// Create a dispatcher with a custom result factory.
    pub fn with_factory(factory: Arc<dyn ResultFactory>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                factory,
            }),
        }
    }

    /// Register a listener. Listeners run in registration order.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Remove every listener.
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Deliver an event to every listener.
    pub fn dispatch(&self, event: &DispatchEvent) {
        // Snapshot so listeners may (un)register without deadlocking.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    /// Wrap a decoded message into a [`ResponseEvent`] and dispatch it.
    pub fn dispatch_message(&self, message: Value, request: Option<Request>) {
        let reply = self.inner.factory.build(&message, request.as_ref());
        self.dispatch(&DispatchEvent::Response(ResponseEvent {
            message,
            request,
            reply,
        }));
    }

    /// Announce that the channel was lost.
    pub fn dispatch_connection_lost(&self, reason: impl Into<String>, diagnostics: Vec<String>) {
        self.dispatch(&DispatchEvent::ConnectionLost(ConnectionLost {
            reason: reason.into(),
            diagnostics,
        }));
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
