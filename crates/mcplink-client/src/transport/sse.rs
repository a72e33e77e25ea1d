//! Server-Sent Events transport.
//!
//! A long-lived GET stream announces the POST endpoint through an `endpoint`
//! event and carries every server message afterwards. Requests are POSTed to
//! that endpoint. When the stream fails it is re-opened after
//! [`HttpTransportConfig::reconnect_delay`].

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use super::http::{HttpTransportConfig, event_stream_error};
use super::{ConnectionState, Inbound, TransportKind, Transporter};
use crate::dispatch::Dispatcher;
use crate::error::{McpError, Result};
use crate::protocol::{Notification, Request, RequestId};

type ReadySignal = oneshot::Sender<Result<()>>;

struct SseInner {
    config: HttpTransportConfig,
    url: Url,
    headers: HeaderMap,
    http: reqwest::Client,
    state: Mutex<ConnectionState>,
    endpoint: Mutex<Option<String>>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    inbound: Inbound,
}

/// Transporter over an SSE stream plus per-request POSTs.
pub struct SseTransporter {
    inner: Arc<SseInner>,
}

impl SseTransporter {
    /// Create a transporter for the given event stream URL.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let url = config.parsed_url()?;
        let headers = config.header_map()?;
        let http = config.build_client()?;

        tracing::info!(url = %config.url, "created SSE transport");

        Ok(Self {
            inner: Arc::new(SseInner {
                config,
                url,
                headers,
                http,
                state: Mutex::new(ConnectionState::Disconnected),
                endpoint: Mutex::new(None),
                stream_task: Mutex::new(None),
                inbound: Inbound::default(),
            }),
        })
    }

    /// The endpoint announced by the server, as sent.
    pub fn endpoint(&self) -> Option<String> {
        self.inner.endpoint.lock().clone()
    }
}

impl fmt::Debug for SseTransporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseTransporter")
            .field("url", &self.inner.config.url)
            .field("state", &*self.inner.state.lock())
            .field("endpoint", &*self.inner.endpoint.lock())
            .finish()
    }
}

impl SseInner {
    /// Keep the event stream open, re-opening it after failures.
    async fn run(self: Arc<Self>, ready: ReadySignal) {
        let mut ready = Some(ready);
        loop {
            let outcome = self.read_stream(&mut ready).await;

            if let Some(ready) = ready.take() {
                let err = outcome
                    .err()
                    .unwrap_or_else(|| McpError::transport("event stream closed before endpoint event"));
                let _ = ready.send(Err(err));
                return;
            }

            let reason = match outcome {
                Ok(()) => "event stream closed".to_string(),
                Err(e) => format!("event stream failed: {e}"),
            };

            let lost = {
                let mut state = self.state.lock();
                match *state {
                    ConnectionState::Connected => {
                        *state = ConnectionState::Reconnecting;
                        true
                    }
                    ConnectionState::Reconnecting => false,
                    _ => return,
                }
            };
            self.endpoint.lock().take();

            if lost {
                tracing::warn!(reason = %reason, "SSE stream lost, reconnecting");
                self.inbound.connection_lost(&reason, Vec::new());
                self.inbound.clear();
            } else {
                tracing::debug!(reason = %reason, "SSE reconnect attempt failed");
            }

            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn read_stream(&self, ready: &mut Option<ReadySignal>) -> Result<()> {
        tracing::debug!(url = %self.url, "opening SSE stream");
        let response = self
            .http
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        let mut events = pin!(response.bytes_stream().eventsource());
        while let Some(event) = events.next().await {
            self.handle_event(event.map_err(event_stream_error)?, ready);
        }
        Ok(())
    }

    fn handle_event(&self, event: Event, ready: &mut Option<ReadySignal>) {
        if event.event == "endpoint" {
            let endpoint = event.data.trim().to_string();
            tracing::debug!(endpoint = %endpoint, "received endpoint from SSE");
            *self.endpoint.lock() = Some(endpoint);

            let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Connected);
            if previous == ConnectionState::Reconnecting {
                tracing::info!("SSE stream re-established");
            }
            if let Some(ready) = ready.take() {
                let _ = ready.send(Ok(()));
            }
            return;
        }

        if event.data.is_empty() {
            return;
        }
        tracing::debug!(event = %event.event, "received SSE event");
        match serde_json::from_str::<Value>(&event.data) {
            Ok(message) => {
                self.inbound.deliver(message);
            }
            Err(e) => {
                tracing::error!(error = %e, data = %event.data, "dropping undecodable SSE event");
            }
        }
    }

    fn endpoint_url(&self) -> Result<Url> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(McpError::NotConnected);
        }
        let endpoint = self.endpoint.lock().clone().ok_or(McpError::NotConnected)?;
        self.url
            .join(&endpoint)
            .map_err(|e| McpError::protocol(format!("invalid endpoint '{}': {}", endpoint, e)))
    }

    /// POST a message. Returns the response body when it is JSON.
    async fn post(&self, body: &impl serde::Serialize) -> Result<Option<Value>> {
        let endpoint = self.endpoint_url()?;
        let response = self
            .http
            .post(endpoint)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(McpError::transport(format!("HTTP error {}: {}", status, text)));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(serde_json::from_str(&text).ok())
    }
}

#[async_trait]
impl Transporter for SseTransporter {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
                ConnectionState::Connected => return Ok(()),
                // The endpoint is not known yet; a second handshake would race the first.
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    return Err(McpError::NotConnected);
                }
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(&self.inner).run(ready_tx));
        if let Some(old) = self.inner.stream_task.lock().replace(task) {
            old.abort();
        }

        let outcome = match ready_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::transport("event stream task ended before endpoint event")),
        };

        if let Err(e) = outcome {
            *self.inner.state.lock() = ConnectionState::Disconnected;
            if let Some(task) = self.inner.stream_task.lock().take() {
                task.abort();
            }
            tracing::error!(url = %self.inner.config.url, error = %e, "SSE handshake failed");
            return Err(McpError::connection_failed(e));
        }

        tracing::info!(url = %self.inner.config.url, "SSE transport connected");
        Ok(())
    }

    async fn listen(&self, dispatcher: Dispatcher) -> Result<()> {
        self.inner.inbound.attach(dispatcher);
        if !self.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }

    async fn send_request(&self, request: &Request) -> Result<()> {
        self.inner.endpoint_url()?;
        self.inner.inbound.track(request);
        tracing::debug!(id = %request.id, method = %request.method, "sending request over SSE transport");

        match self.inner.post(request).await {
            Ok(Some(body)) => {
                // Some servers answer inline instead of on the stream.
                if RequestId::from_message(&body).as_ref() == Some(&request.id) {
                    self.inner.inbound.deliver(body);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.inner.inbound.forget(&request.id);
                tracing::error!(id = %request.id, error = %e, "request failed");
                Err(e)
            }
        }
    }

    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        self.inner.post(notification).await?;
        tracing::debug!(method = %notification.method, "sent notification");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.inner.state.lock() = ConnectionState::Disconnected;
        if let Some(task) = self.inner.stream_task.lock().take() {
            task.abort();
        }
        self.inner.endpoint.lock().take();
        self.inner.inbound.clear();
        tracing::debug!(url = %self.inner.config.url, "disconnected SSE transport");
        Ok(())
    }

    fn clear_request_map(&self) {
        self.inner.inbound.clear();
    }
}
