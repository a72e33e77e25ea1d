//! MCP (Model Context Protocol) client.
//!
//! One [`McpClient`] talks to one server over any of three channels, with
//! every outstanding call settled exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient / BlockingClient                                 │
//! │  - initialize handshake, tools/resources/prompts helpers    │
//! │  - Correlator: one waiter per request id                    │
//! └─────────────────────────────────────────────────────────────┘
//!              │ send_request                 ▲ handle_event
//!              ▼                              │
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │  Transporter                 │──▶│  Dispatcher              │
//! │  - Stdio (line-delimited)    │   │  - ResultFactory → Reply │
//! │  - SSE (GET stream + POST)   │   │  - listeners             │
//! │  - Streamable HTTP           │   └──────────────────────────┘
//! └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcplink_client::{McpClient, ProcessSpec};
//!
//! let client = McpClient::with_process(&ProcessSpec::new("mcp-server-sqlite").with_arg("--db"), 0)?;
//! let info = client.connect().await?;
//! println!("Connected to: {} v{}", info.server_info.name, info.server_info.version);
//!
//! match client.call_tool("query", Some(json!({"sql": "SELECT 1"}))).await? {
//!     Ok(result) => println!("{:?}", result.text()),
//!     Err(rpc) => eprintln!("server error: {rpc}"),
//! }
//! client.disconnect().await?;
//! ```

pub mod blocking;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use blocking::BlockingClient;
pub use client::McpClient;
pub use config::{ClientSettings, McpConfig, ServerConfig, TransportType, default_config_path};
pub use correlator::{Correlator, ReplyCallback, ResponseFuture};
pub use dispatch::{
    ConnectionLost, DispatchEvent, Dispatcher, ListenerId, RawResultFactory, ResponseEvent,
    ResultFactory,
};
pub use error::{McpError, Result};
pub use manager::McpManager;
pub use process::{ProcessFactory, ProcessHandle, ProcessSpec};
pub use protocol::{
    CallToolResult, InitializeParams, InitializeResult, JsonRpcError, ListToolsResult,
    MCP_PROTOCOL_VERSION, Notification, Reply, Request, RequestId, RpcResult, ServerCapabilities,
    ServerInfo, ToolContent, ToolInfo,
};
pub use transport::{
    ConnectionState, HttpTransportConfig, SseTransporter, StdioStreams, StdioTransporter,
    StreamableHttpTransporter, TransportKind, Transporter,
};
