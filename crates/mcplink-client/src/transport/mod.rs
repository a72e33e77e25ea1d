//! Transport layer for MCP communication.
//!
//! A [`Transporter`] owns one physical channel. Three implementations exist:
//!
//! - [`StdioTransporter`]: newline-delimited JSON over a pair of byte streams,
//!   usually a child process's stdin/stdout, with stderr as diagnostics.
//! - [`SseTransporter`]: a long-lived GET event stream that announces the POST
//!   endpoint and carries server messages.
//! - [`StreamableHttpTransporter`]: POST to a single URL; each response is
//!   either plain JSON or a per-request event stream.
//!
//! Transporters never settle requests themselves. They forward every decoded
//! inbound message to the attached [`Dispatcher`].

mod http;
mod sse;
mod stdio;
mod streamable;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::protocol::{Notification, Request, RequestId};

pub use http::{HttpTransportConfig, normalize_content_type};
pub use sse::SseTransporter;
pub use stdio::{ReconnectCallback, StdioStreams, StdioTransporter};
pub use streamable::{SESSION_HEADER, StreamableHttpTransporter};

/// Which kind of channel a transporter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Child process pipes.
    Stdio,
    /// Server-Sent Events plus POST.
    Sse,
    /// Streamable HTTP.
    StreamableHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        })
    }
}

/// Connection lifecycle of a transporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Ready for requests.
    Connected,
    /// The event stream failed and is being re-established.
    Reconnecting,
}

/// A pluggable MCP channel.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// The channel kind.
    fn kind(&self) -> TransportKind;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Establish the channel. Returns once it is ready for requests.
    async fn connect(&self) -> Result<()>;

    /// Attach the dispatch sink, connecting first if needed.
    async fn listen(&self, dispatcher: Dispatcher) -> Result<()>;

    /// Frame and transmit a request.
    ///
    /// The response is delivered through the dispatcher, not returned.
    /// Fails with [`McpError::NotConnected`](crate::McpError::NotConnected)
    /// outside the connected state.
    async fn send_request(&self, request: &Request) -> Result<()>;

    /// Transmit a notification.
    async fn send_notification(&self, notification: &Notification) -> Result<()>;

    /// Tear the channel down and release its handles.
    async fn disconnect(&self) -> Result<()>;

    /// Whether requests can be sent right now.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Forget every tracked request.
    fn clear_request_map(&self);

    /// Recent diagnostic output from the peer, oldest first.
    fn diagnostics(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Per-transporter inbound state: the id→request map and the attached sink.
#[derive(Default)]
pub(crate) struct Inbound {
    requests: Mutex<HashMap<RequestId, Request>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Inbound {
    pub(crate) fn attach(&self, dispatcher: Dispatcher) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    pub(crate) fn track(&self, request: &Request) {
        self.requests
            .lock()
            .insert(request.id.clone(), request.clone());
    }

    pub(crate) fn forget(&self, id: &RequestId) {
        self.requests.lock().remove(id);
    }

    pub(crate) fn clear(&self) {
        self.requests.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.requests.lock().len()
    }

    /// Hand a decoded message to the sink. Returns the message id, if any.
    pub(crate) fn deliver(&self, message: Value) -> Option<RequestId> {
        let id = RequestId::from_message(&message);
        let request = id.as_ref().and_then(|id| self.requests.lock().remove(id));

        let dispatcher = self.dispatcher.lock().clone();
        match dispatcher {
            Some(dispatcher) => {
                tracing::debug!(id = ?id.as_ref().map(RequestId::as_str), "dispatching inbound message");
                dispatcher.dispatch_message(message, request);
            }
            None => {
                tracing::debug!("no dispatcher attached, dropping inbound message");
            }
        }
        id
    }

    pub(crate) fn connection_lost(&self, reason: &str, diagnostics: Vec<String>) {
        let dispatcher = self.dispatcher.lock().clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch_connection_lost(reason, diagnostics);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::dispatch::DispatchEvent;

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Stdio.to_string(), "stdio");
        assert_eq!(TransportKind::StreamableHttp.to_string(), "streamable-http");
    }

    #[test]
    fn test_inbound_attaches_original_request_once() {
        let inbound = Inbound::default();
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        dispatcher.add_listener(move |event| {
            if let DispatchEvent::Response(event) = event {
                s.lock().push(event.request.as_ref().map(|r| r.method.clone()));
            }
        });
        inbound.attach(dispatcher);

        inbound.track(&Request::new("tools/list", None).with_id("7"));
        assert_eq!(inbound.tracked(), 1);

        let id = inbound.deliver(json!({"jsonrpc": "2.0", "id": "7", "result": {}}));
        assert_eq!(id, Some(RequestId::from("7")));
        inbound.deliver(json!({"jsonrpc": "2.0", "id": "7", "result": {}}));

        assert_eq!(
            *seen.lock(),
            vec![Some("tools/list".to_string()), None]
        );
        assert_eq!(inbound.tracked(), 0);
    }

    #[test]
    fn test_inbound_without_dispatcher_drops() {
        let inbound = Inbound::default();
        inbound.track(&Request::new("ping", None).with_id("1"));
        assert!(inbound.deliver(json!({"id": "1", "result": {}})).is_some());
        inbound.clear();
        assert_eq!(inbound.tracked(), 0);
    }
}
