//! Error types for MCP operations.

use thiserror::Error;

use crate::protocol::RequestId;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// How many diagnostic lines are quoted in an aborted-connection message.
const DIAGNOSTIC_TAIL: usize = 3;

/// Error type for MCP operations.
///
/// Server-reported JSON-RPC errors are not represented here: they arrive as
/// [`JsonRpcError`](crate::protocol::JsonRpcError) values inside a
/// [`Reply`](crate::protocol::Reply).
#[derive(Debug, Error)]
pub enum McpError {
    /// A request was sent while the transporter was not connected.
    #[error("not connected to MCP server")]
    NotConnected,

    /// The connection handshake failed.
    #[error("failed to connect to MCP server: {0}")]
    ConnectionFailed(#[source] Box<McpError>),

    /// The channel died before anything could be resolved.
    #[error("{message}")]
    ConnectionAbortedEarly {
        /// Human-readable description, including the latest diagnostics.
        message: String,
        /// Every diagnostic line captured before the abort.
        diagnostics: Vec<String>,
    },

    /// The connection was torn down while the request was pending.
    #[error("connection closed before response")]
    ConnectionClosed,

    /// A per-request event stream ended without a matching response.
    #[error("event stream closed before response was received for request ID [{0}]")]
    ClosedBeforeResponse(RequestId),

    /// An operation with the same id is already pending.
    #[error("request [{0}] is already in progress")]
    AlreadyInProgress(RequestId),

    /// The server process could not be started.
    #[error("failed to start MCP server process: {0}")]
    ProcessStart(String),

    /// No usable input/output streams were bound.
    #[error("invalid streams: {0}")]
    InvalidStreams(String),

    /// An HTTP response carried a content type the transport cannot interpret.
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// Malformed data on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Generic transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl McpError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an error as a handshake failure.
    ///
    /// Aborted connections pass through untouched so their diagnostics stay
    /// visible to the caller.
    pub fn connection_failed(err: McpError) -> Self {
        match err {
            err @ (Self::ConnectionAbortedEarly { .. } | Self::ConnectionFailed(_)) => err,
            other => Self::ConnectionFailed(Box::new(other)),
        }
    }

    /// Build an aborted-connection error quoting the latest diagnostics.
    pub fn aborted_early(reason: &str, diagnostics: Vec<String>) -> Self {
        let mut message = format!("Connection aborted early: {reason}.");
        if !diagnostics.is_empty() {
            let start = diagnostics.len().saturating_sub(DIAGNOSTIC_TAIL);
            message.push_str("\n\nLatest errors:\n");
            message.push_str(&diagnostics[start..].join("\n"));
        }
        Self::ConnectionAbortedEarly {
            message,
            diagnostics,
        }
    }

    /// Diagnostics attached to this error, if any.
    pub fn diagnostics(&self) -> &[String] {
        match self {
            Self::ConnectionAbortedEarly { diagnostics, .. } => diagnostics,
            Self::ConnectionFailed(inner) => inner.diagnostics(),
            _ => &[],
        }
    }
}
