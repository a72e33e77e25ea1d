//! Streamable HTTP transport.
//!
//! Every message is POSTed to one URL. The response content type decides how
//! it is read: `application/json` carries one message or a batch, while
//! `text/event-stream` turns the response body into a stream dedicated to
//! that request, kept open until the matching response arrives. The server's
//! `Mcp-Session-Id` header is echoed on every later request.

use std::collections::HashMap;
use std::fmt;
use std::pin::pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tokio::sync::oneshot;
use url::Url;

use super::http::{HttpTransportConfig, event_stream_error, normalize_content_type};
use super::{ConnectionState, Inbound, TransportKind, Transporter};
use crate::dispatch::Dispatcher;
use crate::error::{McpError, Result};
use crate::protocol::{Notification, Request, RequestId};

/// Header carrying the server-issued session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json,text/event-stream";

/// Transporter for the Streamable HTTP channel.
pub struct StreamableHttpTransporter {
    config: HttpTransportConfig,
    url: Url,
    headers: HeaderMap,
    http: reqwest::Client,
    state: Mutex<ConnectionState>,
    session_id: RwLock<Option<String>>,
    /// Open per-request streams, keyed by request id.
    streams: Mutex<HashMap<RequestId, oneshot::Sender<()>>>,
    inbound: Inbound,
}

/// Unregisters a per-request stream however its reader exits.
struct StreamGuard<'a> {
    streams: &'a Mutex<HashMap<RequestId, oneshot::Sender<()>>>,
    id: RequestId,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.streams.lock().remove(&self.id);
    }
}

impl StreamableHttpTransporter {
    /// Create a transporter for the given endpoint.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let url = config.parsed_url()?;
        let headers = config.header_map()?;
        let http = config.build_client()?;

        tracing::info!(url = %config.url, "created Streamable HTTP transport");

        Ok(Self {
            config,
            url,
            headers,
            http,
            state: Mutex::new(ConnectionState::Disconnected),
            session_id: RwLock::new(None),
            streams: Mutex::new(HashMap::new()),
            inbound: Inbound::default(),
        })
    }

    /// The current session id, if the server issued one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Number of per-request streams currently open.
    pub fn open_streams(&self) -> usize {
        self.streams.lock().len()
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_BOTH);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.json(body).send().await?;
        self.capture_session(&response);

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::transport(format!("HTTP error {}: {}", status, text)));
        }
        Ok(response)
    }

    fn capture_session(&self, response: &reqwest::Response) {
        let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let mut current = self.session_id.write();
        if current.as_deref() != Some(session) {
            tracing::debug!(session_id = %session, "updated session id from response");
            *current = Some(session.to_string());
        }
    }

    async fn exchange(&self, request: &Request) -> Result<()> {
        let response = self.post(request).await?;
        let status = response.status();
        let content_type = normalize_content_type(response.headers().get(CONTENT_TYPE));

        match content_type.as_str() {
            "application/json" => {
                let body = response.bytes().await?;
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Err(McpError::ClosedBeforeResponse(request.id.clone()));
                }
                let payload: Value = serde_json::from_slice(&body).map_err(|e| {
                    tracing::error!(error = %e, "failed to decode Streamable HTTP JSON response");
                    McpError::protocol(format!("failed to decode JSON response: {e}"))
                })?;
                tracing::debug!(id = %request.id, "received Streamable HTTP JSON response");
                if self.deliver_payload(payload, &request.id) {
                    Ok(())
                } else {
                    Err(McpError::ClosedBeforeResponse(request.id.clone()))
                }
            }
            "text/event-stream" => self.consume_stream(response, &request.id).await,
            "" if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT => {
                Err(McpError::ClosedBeforeResponse(request.id.clone()))
            }
            _ => {
                let raw = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Err(McpError::UnexpectedContentType(raw))
            }
        }
    }

    /// Read a per-request event stream until the response for `id` shows up.
    async fn consume_stream(&self, response: reqwest::Response, id: &RequestId) -> Result<()> {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.streams.lock().insert(id.clone(), cancel_tx);
        let _guard = StreamGuard {
            streams: &self.streams,
            id: id.clone(),
        };

        let mut events = pin!(response.bytes_stream().eventsource());
        loop {
            tokio::select! {
                _ = &mut cancel_rx => return Err(McpError::ConnectionClosed),
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if event.data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(&event.data) {
                            Ok(payload) => {
                                if self.deliver_payload(payload, id) {
                                    return Ok(());
                                }
                            }
                            Err(e) => tracing::error!(
                                id = %id,
                                error = %e,
                                data = %event.data,
                                "dropping undecodable event"
                            ),
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(id = %id, error = %e, "Streamable HTTP event stream error");
                        return Err(event_stream_error(e));
                    }
                    None => return Err(McpError::ClosedBeforeResponse(id.clone())),
                },
            }
        }
    }

    /// Dispatch one message or a batch. True when any item answers `id`.
    fn deliver_payload(&self, payload: Value, id: &RequestId) -> bool {
        let items = match payload {
            Value::Array(items) => items,
            other => vec![other],
        };
        let mut matched = false;
        for item in items.into_iter().filter(Value::is_object) {
            matched |= self.inbound.deliver(item).as_ref() == Some(id);
        }
        matched
    }
}

impl fmt::Debug for StreamableHttpTransporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpTransporter")
            .field("url", &self.config.url)
            .field("state", &*self.state.lock())
            .field("session_id", &*self.session_id.read())
            .field("open_streams", &self.open_streams())
            .finish()
    }
}

#[async_trait]
impl Transporter for StreamableHttpTransporter {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// There is no persistent channel: the initialize exchange doubles as
    /// the handshake.
    async fn connect(&self) -> Result<()> {
        *self.state.lock() = ConnectionState::Connected;
        tracing::debug!(url = %self.config.url, "Streamable HTTP transport ready");
        Ok(())
    }

    async fn listen(&self, dispatcher: Dispatcher) -> Result<()> {
        self.inbound.attach(dispatcher);
        if !self.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }

    async fn send_request(&self, request: &Request) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        self.inbound.track(request);
        tracing::debug!(id = %request.id, method = %request.method, "sending request over Streamable HTTP");

        let outcome = self.exchange(request).await;
        if let Err(e) = &outcome {
            self.inbound.forget(&request.id);
            tracing::error!(id = %request.id, error = %e, "request failed");
        }
        outcome
    }

    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        self.post(notification).await?;
        tracing::debug!(method = %notification.method, "sent notification");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.state.lock() = ConnectionState::Disconnected;
        let streams: Vec<_> = self.streams.lock().drain().collect();
        for (id, cancel) in streams {
            tracing::debug!(id = %id, "closing open response stream");
            let _ = cancel.send(());
        }
        self.session_id.write().take();
        self.inbound.clear();
        tracing::debug!(url = %self.config.url, "disconnected Streamable HTTP transport");
        Ok(())
    }

    fn clear_request_map(&self) {
        self.inbound.clear();
    }
}
