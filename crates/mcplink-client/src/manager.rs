//! MCP Manager for multi-server lifecycle management.
//!
//! The [`McpManager`] keeps named server configurations and the clients
//! connected to them.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcplink_client::{McpManager, ServerConfig};
//!
//! let mut manager = McpManager::new();
//! manager.add_server(ServerConfig::stdio("sqlite", "mcp-server-sqlite").with_arg("--db"));
//!
//! manager.connect_all().await;
//! let tools = manager.list_all_tools().await;
//! println!("Servers with tools: {}", tools.len());
//!
//! manager.shutdown_all().await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::client::McpClient;
use crate::config::{ClientSettings, McpConfig, ServerConfig};
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, RpcResult, ToolInfo};

/// Manager for multiple MCP server connections.
#[derive(Default)]
pub struct McpManager {
    settings: ClientSettings,
    /// Server configurations (before connection).
    configs: BTreeMap<String, ServerConfig>,
    /// Connected and initialized clients.
    clients: BTreeMap<String, Arc<McpClient>>,
}

impl McpManager {
    /// Create a new empty MCP manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with the enabled servers of a config file.
    pub fn from_config(config: &McpConfig) -> Self {
        let mut manager = Self {
            settings: config.client.clone(),
            ..Self::default()
        };
        for server in config.enabled_servers() {
            manager.add_server(server.clone());
        }
        manager
    }

    /// Add a server configuration, replacing one with the same name.
    pub fn add_server(&mut self, config: ServerConfig) {
        let name = config.name.clone();
        tracing::debug!(server = %name, "adding MCP server configuration");
        self.configs.insert(name, config);
    }

    /// Remove a server by name, disconnecting it first.
    ///
    /// Returns true if the server was configured.
    pub async fn remove_server(&mut self, name: &str) -> bool {
        self.shutdown_server(name).await;
        if self.configs.remove(name).is_some() {
            tracing::debug!(server = %name, "removed MCP server configuration");
            true
        } else {
            false
        }
    }

    /// Get the names of all configured servers.
    pub fn server_names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    /// Get the names of all connected servers.
    pub fn connected_server_names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    /// Check if a server is configured.
    pub fn has_server(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    /// Check if a server is connected.
    pub fn is_connected(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Get a connected client by name.
    pub fn get_client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.get(name).cloned()
    }

    /// Connect to all configured servers.
    ///
    /// Servers that fail to connect are logged and skipped. Returns the
    /// number of servers connected by this call.
    pub async fn connect_all(&mut self) -> usize {
        let names: Vec<String> = self
            .configs
            .keys()
            .filter(|name| !self.clients.contains_key(*name))
            .cloned()
            .collect();

        let mut connected = 0;
        for name in names {
            match self.connect_server(&name).await {
                Ok(()) => connected += 1,
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect to MCP server");
                }
            }
        }

        tracing::info!(
            connected,
            total = self.configs.len(),
            "MCP server connection complete"
        );
        connected
    }

    /// Connect a single server by name.
    ///
    /// If the server is already connected, returns Ok without reconnecting.
    pub async fn connect_server(&mut self, name: &str) -> Result<()> {
        if self.clients.contains_key(name) {
            return Ok(());
        }
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| McpError::config(format!("server '{}' not configured", name)))?;

        let client = McpClient::from_config(config)?.with_settings(&self.settings);
        if let Err(e) = client.connect().await {
            // Release the process or stream before reporting.
            let _ = client.disconnect().await;
            return Err(e);
        }

        self.clients.insert(name.to_string(), Arc::new(client));
        tracing::info!(server = %name, "MCP server connected");
        Ok(())
    }

    /// List all tools from all connected servers.
    ///
    /// Servers that fail or report an error are logged and left out.
    pub async fn list_all_tools(&self) -> BTreeMap<String, Vec<ToolInfo>> {
        let mut all_tools = BTreeMap::new();

        for (name, client) in &self.clients {
            match client.list_tools(None).await {
                Ok(Ok(result)) => {
                    tracing::debug!(server = %name, tool_count = result.tools.len(), "listed tools");
                    all_tools.insert(name.clone(), result.tools);
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %name, error = %e, "server rejected tools/list");
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to list tools");
                }
            }
        }

        all_tools
    }

    /// Call a tool on a named server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<Value>,
    ) -> Result<RpcResult<CallToolResult>> {
        let client = self
            .clients
            .get(server)
            .ok_or_else(|| McpError::config(format!("server '{}' not connected", server)))?;
        client.call_tool(tool, arguments).await
    }

    /// Disconnect one server. Returns true if it was connected.
    pub async fn shutdown_server(&mut self, name: &str) -> bool {
        let Some(client) = self.clients.remove(name) else {
            return false;
        };
        tracing::info!(server = %name, "shutting down MCP server");
        if let Err(e) = client.disconnect().await {
            tracing::warn!(server = %name, error = %e, "error while disconnecting");
        }
        true
    }

    /// Disconnect every server. Configurations are kept for reconnection.
    pub async fn shutdown_all(&mut self) {
        tracing::info!(
            server_count = self.clients.len(),
            "shutting down all MCP servers"
        );
        let names: Vec<String> = self.clients.keys().cloned().collect();
        for name in names {
            self.shutdown_server(&name).await;
        }
    }

    /// Get the number of configured servers.
    pub fn config_count(&self) -> usize {
        self.configs.len()
    }

    /// Get the number of connected servers.
    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("configured", &self.configs.keys().collect::<Vec<_>>())
            .field("connected", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
