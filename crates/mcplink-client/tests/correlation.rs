//! Correlation tests for [`McpClient`] over a scripted in-memory transporter.
//!
//! The transporter records every request it is asked to send and lets the
//! test decide which responses arrive, and when.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mcplink_client::{
    ConnectionState, Dispatcher, JsonRpcError, McpClient, McpError, Notification, Reply, Request,
    RequestId, TransportKind, Transporter,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

struct ScriptedTransporter {
    state: Mutex<ConnectionState>,
    dispatcher: Mutex<Option<Dispatcher>>,
    sent: mpsc::UnboundedSender<Request>,
    notifications: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    cleared: AtomicBool,
}

impl ScriptedTransporter {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Request>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let transporter = Arc::new(Self {
            state: Mutex::new(ConnectionState::Disconnected),
            dispatcher: Mutex::new(None),
            sent,
            notifications: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            cleared: AtomicBool::new(false),
        });
        (transporter, rx)
    }

    /// Push a raw inbound message through the attached dispatcher.
    fn inject(&self, message: Value) {
        let dispatcher = self.dispatcher.lock().clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch_message(message, None);
        }
    }

    fn lose_connection(&self, reason: &str, diagnostics: Vec<String>) {
        *self.state.lock() = ConnectionState::Disconnected;
        let dispatcher = self.dispatcher.lock().clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch_connection_lost(reason, diagnostics);
        }
    }
}

#[async_trait]
impl Transporter for ScriptedTransporter {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn connect(&self) -> mcplink_client::Result<()> {
        *self.state.lock() = ConnectionState::Connected;
        Ok(())
    }

    async fn listen(&self, dispatcher: Dispatcher) -> mcplink_client::Result<()> {
        *self.dispatcher.lock() = Some(dispatcher);
        self.connect().await
    }

    async fn send_request(&self, request: &Request) -> mcplink_client::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(McpError::transport("write failed"));
        }
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        if request.method == "initialize" {
            self.inject(json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "result": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "0.1.0"}
                }
            }));
        }
        let _ = self.sent.send(request.clone());
        Ok(())
    }

    async fn send_notification(&self, notification: &Notification) -> mcplink_client::Result<()> {
        self.notifications.lock().push(notification.method.clone());
        Ok(())
    }

    async fn disconnect(&self) -> mcplink_client::Result<()> {
        *self.state.lock() = ConnectionState::Disconnected;
        Ok(())
    }

    fn clear_request_map(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }
}

async fn connected_client() -> (Arc<ScriptedTransporter>, McpClient, mpsc::UnboundedReceiver<Request>) {
    let (transporter, mut sent) = ScriptedTransporter::new();
    let client = McpClient::new(transporter.clone());
    let info = client.connect().await.unwrap();
    assert_eq!(info.server_info.name, "scripted");
    let init = sent.recv().await.unwrap();
    assert_eq!(init.method, "initialize");
    (transporter, client, sent)
}

async fn next_sent(sent: &mut mpsc::UnboundedReceiver<Request>) -> Request {
    tokio::time::timeout(Duration::from_secs(5), sent.recv())
        .await
        .expect("request was never sent")
        .expect("transporter dropped")
}

fn ok_response(id: &RequestId, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

#[tokio::test]
async fn test_handshake_sends_initialized_notification() {
    let (transporter, client, _sent) = connected_client().await;
    assert!(client.is_connected());
    assert_eq!(
        transporter.notifications.lock().as_slice(),
        ["notifications/initialized"]
    );
    assert!(client.server_info().is_some());
}

#[tokio::test]
async fn test_response_settles_exactly_once() {
    let (transporter, client, mut sent) = connected_client().await;

    let future = client.send_request_async(Request::new("tools/list", None));
    let request = next_sent(&mut sent).await;
    assert_eq!(client.pending_requests(), 1);

    transporter.inject(ok_response(&request.id, json!({"tools": []})));
    transporter.inject(ok_response(&request.id, json!({"tools": ["late"]})));

    let reply = future.await.unwrap();
    assert_eq!(reply.id, request.id);
    assert_eq!(reply.result(), Some(&json!({"tools": []})));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let (transporter, client, mut sent) = connected_client().await;

    let first = client.send_request_async(Request::new("a", None));
    let second = client.send_request_async(Request::new("b", None));
    let mut requests = vec![next_sent(&mut sent).await, next_sent(&mut sent).await];
    requests.sort_by(|x, y| x.method.cmp(&y.method));

    transporter.inject(ok_response(&requests[1].id, json!("second")));
    transporter.inject(ok_response(&requests[0].id, json!("first")));

    assert_eq!(first.await.unwrap().result(), Some(&json!("first")));
    assert_eq!(second.await.unwrap().result(), Some(&json!("second")));
}

#[tokio::test]
async fn test_server_error_is_a_value() {
    let (transporter, client, mut sent) = connected_client().await;

    let future = client.send_request_async(Request::new("nope", None));
    let request = next_sent(&mut sent).await;
    transporter.inject(json!({
        "jsonrpc": "2.0",
        "id": request.id,
        "error": {"code": -32601, "message": "Method not found"}
    }));

    let reply = future.await.unwrap();
    assert!(reply.is_error());
    let outcome = reply.into_typed::<Value>().unwrap();
    let err = outcome.unwrap_err();
    assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
    assert_eq!(err.message, "Method not found");
}

#[tokio::test]
async fn test_callback_fires_with_reply() {
    let (transporter, client, mut sent) = connected_client().await;

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let future = client.send_request(
        Request::new("ping", None).with_id("cb-1"),
        Some(Box::new(move |reply: &Reply| {
            *sink.lock() = reply.result().cloned();
        })),
    );
    let request = next_sent(&mut sent).await;
    assert_eq!(request.id.as_str(), "cb-1");

    transporter.inject(ok_response(&request.id, json!({"pong": true})));
    future.await.unwrap();
    assert_eq!(*seen.lock(), Some(json!({"pong": true})));
}

#[tokio::test]
async fn test_duplicate_id_never_reaches_transport() {
    let (transporter, client, mut sent) = connected_client().await;

    let first = client.send_request_async(Request::new("ping", None).with_id("dup"));
    next_sent(&mut sent).await;

    let err = client
        .send_request_async(Request::new("ping", None).with_id("dup"))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::AlreadyInProgress(ref id) if id.as_str() == "dup"));

    tokio::task::yield_now().await;
    assert!(sent.try_recv().is_err());
    assert_eq!(client.pending_requests(), 1);

    transporter.inject(ok_response(&RequestId::from("dup"), json!({})));
    assert!(first.await.is_ok());
}

#[tokio::test]
async fn test_disconnect_rejects_every_pending_request() {
    let (_transporter, client, mut sent) = connected_client().await;

    let futures: Vec<_> = (0..3)
        .map(|i| client.send_request_async(Request::new(format!("slow/{i}"), None)))
        .collect();
    for _ in 0..3 {
        next_sent(&mut sent).await;
    }
    assert_eq!(client.pending_requests(), 3);

    client.disconnect().await.unwrap();

    for future in futures {
        let err = future.await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed));
        assert_eq!(err.to_string(), "connection closed before response");
    }
    assert_eq!(client.pending_requests(), 0);
    assert!(!client.is_connected());
    assert!(client.server_info().is_none());
}

#[tokio::test]
async fn test_disconnect_clears_transport_request_map() {
    let (transporter, client, _sent) = connected_client().await;
    client.disconnect().await.unwrap();
    assert!(transporter.cleared.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_response_after_disconnect_is_dropped() {
    let (transporter, client, mut sent) = connected_client().await;

    let future = client.send_request_async(Request::new("ping", None));
    let request = next_sent(&mut sent).await;
    client.disconnect().await.unwrap();
    assert!(future.await.is_err());

    transporter.inject(ok_response(&request.id, json!({})));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_connection_loss_rejects_with_diagnostics() {
    let (transporter, client, mut sent) = connected_client().await;

    let future = client.send_request_async(Request::new("tools/call", None));
    next_sent(&mut sent).await;

    transporter.lose_connection(
        "server output stream closed",
        vec!["alpha".into(), "beta".into(), "gamma".into(), "delta".into()],
    );

    let err = future.await.unwrap_err();
    assert!(matches!(err, McpError::ConnectionAbortedEarly { .. }));
    let message = err.to_string();
    assert!(message.contains("server output stream closed"));
    assert!(message.contains("Latest errors:\nbeta\ngamma\ndelta"));
    assert!(!message.contains("alpha"));
    assert_eq!(err.diagnostics().len(), 4);
}

#[tokio::test]
async fn test_send_failure_rejects_request() {
    let (transporter, client, _sent) = connected_client().await;
    transporter.fail_sends.store(true, Ordering::SeqCst);

    let err = client
        .send_request_async(Request::new("ping", None))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Transport(_)));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_send_while_disconnected() {
    let (transporter, _sent) = ScriptedTransporter::new();
    let client = McpClient::new(transporter);
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, McpError::NotConnected));
}

#[tokio::test]
async fn test_typed_helper_decodes_result() {
    let (transporter, client, mut sent) = connected_client().await;

    let responder = {
        let transporter = Arc::clone(&transporter);
        tokio::spawn(async move {
            let request = next_sent(&mut sent).await;
            assert_eq!(request.method, "tools/call");
            assert_eq!(request.params.as_ref().unwrap()["name"], "echo");
            transporter.inject(ok_response(
                &request.id,
                json!({"content": [{"type": "text", "text": "hi"}]}),
            ));
        })
    };

    let result = client
        .call_tool("echo", Some(json!({"message": "hi"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("hi"));
    assert!(!result.is_error());
    responder.await.unwrap();
}

#[tokio::test]
async fn test_extra_listener_sees_notifications() {
    let (transporter, mut sent) = ScriptedTransporter::new();
    let dispatcher = Dispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher.add_listener(move |event| {
        if let mcplink_client::DispatchEvent::Response(event) = event {
            if let Some(method) = event.message.get("method").and_then(Value::as_str) {
                sink.lock().push(method.to_string());
            }
        }
    });

    let client = McpClient::with_dispatcher(transporter.clone(), dispatcher);
    client.connect().await.unwrap();
    next_sent(&mut sent).await;

    transporter.inject(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}));
    assert_eq!(seen.lock().as_slice(), ["notifications/tools/list_changed"]);
    assert_eq!(client.pending_requests(), 0);
}
