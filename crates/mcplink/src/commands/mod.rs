//! CLI command handlers.

pub mod call;
pub mod list;
pub mod ping;
pub mod prompts;
pub mod resources;
pub mod tools;

use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use mcplink_client::{McpClient, McpConfig, RpcResult, ServerConfig, default_config_path};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, if given.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Resolve and load the config file.
    pub fn load_config(&self) -> Result<McpConfig> {
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => default_config_path()
                .filter(|p| p.exists())
                .ok_or_else(|| anyhow!("no config file found; pass --config <PATH>"))?,
        };
        tracing::debug!(path = %path.display(), "loading config");
        McpConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
    }

    /// Connect and initialize the named server.
    pub async fn connect(&self, name: &str) -> Result<McpClient> {
        let config = self.load_config()?;
        let server = config
            .find(name)
            .ok_or_else(|| anyhow!("server '{}' not found in config", name))?;
        connect_server(&config, server).await
    }
}

/// Connect to one config entry.
pub async fn connect_server(config: &McpConfig, server: &ServerConfig) -> Result<McpClient> {
    let client = McpClient::from_config(server)?.with_settings(&config.client);
    if let Err(e) = client.connect().await {
        let _ = client.disconnect().await;
        return Err(e).with_context(|| format!("could not connect to '{}'", server.name));
    }
    Ok(client)
}

/// Turn a server-reported error into a CLI error.
pub fn server_result<T>(outcome: RpcResult<T>) -> Result<T> {
    outcome.map_err(|e| anyhow!("server returned error {}: {}", e.code, e.message))
}

/// Print a value as pretty JSON.
pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
