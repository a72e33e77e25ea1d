//! HTTP primitives shared by the SSE and Streamable HTTP transporters.

use std::time::Duration;

use eventsource_stream::EventStreamError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::{McpError, Result};

/// Configuration for HTTP-based transports.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Server URL. For SSE this is the event stream; for Streamable HTTP the
    /// single endpoint.
    pub url: String,
    /// Extra headers sent on every request, passed through untouched.
    pub headers: Vec<(String, String)>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Delay before re-opening a failed SSE stream.
    pub reconnect_delay: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl HttpTransportConfig {
    /// Create a new HTTP transport config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the SSE reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Parse and validate the URL.
    pub(crate) fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url)
            .map_err(|e| McpError::config(format!("invalid URL '{}': {}", self.url, e)))
    }

    /// Build the extra headers.
    pub(crate) fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| McpError::config(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::config(format!("invalid value for header '{}': {}", key, e)))?;
            map.append(name, value);
        }
        Ok(map)
    }

    /// Build the HTTP client.
    ///
    /// Only the connect phase is bounded: response bodies may be long-lived
    /// event streams.
    pub(crate) fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))
    }
}

/// Media type of a `Content-Type` value: parameters dropped, lowercased, trimmed.
pub fn normalize_content_type(value: Option<&HeaderValue>) -> String {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Map an event stream failure onto the error categories.
pub(crate) fn event_stream_error(err: EventStreamError<reqwest::Error>) -> McpError {
    match err {
        EventStreamError::Transport(e) => McpError::from(e),
        other => McpError::protocol(format!("malformed event stream: {}", other)),
    }
}
