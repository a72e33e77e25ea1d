//! Blocking wrapper around [`McpClient`].
//!
//! Each call drives a private current-thread runtime until its own future
//! settles. Background reader tasks live on the same runtime, so they keep
//! servicing I/O while a call is blocked.

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::client::McpClient;
use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolResult, GetPromptResult, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, Notification, ReadResourceResult, Reply, Request, RpcResult,
};

/// Synchronous MCP client.
pub struct BlockingClient {
    runtime: Runtime,
    client: McpClient,
}

impl BlockingClient {
    /// Wrap a client built by `make`, which runs inside the private runtime.
    pub fn new(make: impl FnOnce() -> Result<McpClient>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| McpError::transport(format!("failed to build runtime: {e}")))?;
        let client = {
            let _guard = runtime.enter();
            make()?
        };
        Ok(Self { runtime, client })
    }

    /// Build a client from a server config entry.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::new(|| McpClient::from_config(config))
    }

    /// The wrapped async client.
    pub fn inner(&self) -> &McpClient {
        &self.client
    }

    /// Connect and initialize.
    pub fn connect(&self) -> Result<InitializeResult> {
        self.runtime.block_on(self.client.connect())
    }

    /// Send a raw request and wait for its reply.
    pub fn request(&self, request: Request) -> Result<Reply> {
        let _guard = self.runtime.enter();
        let future = self.client.send_request_async(request);
        self.runtime.block_on(future)
    }

    /// Send a notification.
    pub fn notify(&self, notification: Notification) -> Result<()> {
        self.runtime.block_on(self.client.notify(notification))
    }

    /// Check the server is alive.
    pub fn ping(&self) -> Result<RpcResult<()>> {
        self.runtime.block_on(self.client.ping())
    }

    /// List available tools.
    pub fn list_tools(&self, cursor: Option<&str>) -> Result<RpcResult<ListToolsResult>> {
        self.runtime.block_on(self.client.list_tools(cursor))
    }

    /// Call a tool.
    pub fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<RpcResult<CallToolResult>> {
        self.runtime.block_on(self.client.call_tool(name, arguments))
    }

    /// List available resources.
    pub fn list_resources(&self, cursor: Option<&str>) -> Result<RpcResult<ListResourcesResult>> {
        self.runtime.block_on(self.client.list_resources(cursor))
    }

    /// Read a resource.
    pub fn read_resource(&self, uri: &str) -> Result<RpcResult<ReadResourceResult>> {
        self.runtime.block_on(self.client.read_resource(uri))
    }

    /// List available prompts.
    pub fn list_prompts(&self, cursor: Option<&str>) -> Result<RpcResult<ListPromptsResult>> {
        self.runtime.block_on(self.client.list_prompts(cursor))
    }

    /// Render a prompt.
    pub fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<RpcResult<GetPromptResult>> {
        self.runtime.block_on(self.client.get_prompt(name, arguments))
    }

    /// Disconnect from the server.
    pub fn disconnect(&self) -> Result<()> {
        self.runtime.block_on(self.client.disconnect())
    }
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        if self.client.is_connected() {
            if let Err(e) = self.runtime.block_on(self.client.disconnect()) {
                tracing::debug!(error = %e, "error disconnecting on drop");
            }
        }
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("client", &self.client)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransportConfig;

    #[test]
    fn test_blocking_not_connected() {
        let client = BlockingClient::new(|| {
            McpClient::with_streamable_http(HttpTransportConfig::new("http://localhost:1/mcp"))
        })
        .unwrap();
        assert!(matches!(client.ping(), Err(McpError::NotConnected)));
    }

    #[test]
    fn test_blocking_spawn_failure() {
        let err = BlockingClient::from_config(&ServerConfig::stdio(
            "x",
            "nonexistent-command-that-does-not-exist-12345",
        ))
        .unwrap_err();
        assert!(matches!(err, McpError::ProcessStart(_)));
    }
}
