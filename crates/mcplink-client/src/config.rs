//! TOML configuration for MCP servers.
//!
//! ```toml
//! [client]
//! name = "mcplink"
//! protocol_version = "2025-03-26"
//!
//! [[servers]]
//! name = "files"
//! transport = "stdio"
//! command = "mcp-server-files"
//! args = ["--root", "/tmp"]
//! env = [["DEBUG", "1"]]
//! auto_restart = 2
//!
//! [[servers]]
//! name = "remote"
//! transport = "streamable-http"
//! url = "https://example.com/mcp"
//! headers = [["Authorization", "Bearer x"]]
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{McpError, Result};
use crate::process::ProcessSpec;
use crate::protocol::MCP_PROTOCOL_VERSION;
use crate::transport::HttpTransportConfig;

/// Transport type for MCP server connections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    /// Stdio transport - spawns a child process.
    #[default]
    Stdio,
    /// Server-Sent Events transport.
    Sse,
    /// Streamable HTTP transport.
    StreamableHttp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// The `[client]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    /// Client name announced during initialization.
    pub name: String,
    /// Client version announced during initialization. Defaults to the crate version.
    pub version: Option<String>,
    /// Protocol version to request.
    pub protocol_version: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: "mcplink".to_string(),
            version: None,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique name for this server.
    pub name: String,
    /// Transport type. Defaults to stdio.
    #[serde(default)]
    pub transport: TransportType,
    /// Command to execute (stdio).
    #[serde(default)]
    pub command: String,
    /// Server URL (sse, streamable-http).
    pub url: Option<String>,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables as `[key, value]` pairs.
    #[serde(default)]
    pub env: Vec<[String; 2]>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// HTTP headers as `[key, value]` pairs.
    #[serde(default)]
    pub headers: Vec<[String; 2]>,
    /// How many times a crashed process is restarted (stdio).
    #[serde(default)]
    pub auto_restart: u32,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Delay before re-opening a lost SSE stream, in milliseconds.
    pub reconnect_delay_ms: Option<u64>,
    /// Whether this server is enabled. Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    fn with_transport(name: impl Into<String>, transport: TransportType) -> Self {
        Self {
            name: name.into(),
            transport,
            command: String::new(),
            url: None,
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            headers: Vec::new(),
            auto_restart: 0,
            connect_timeout_secs: None,
            reconnect_delay_ms: None,
            enabled: true,
        }
    }

    /// Create a stdio server entry.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        let mut config = Self::with_transport(name, TransportType::Stdio);
        config.command = command.into();
        config
    }

    /// Create an SSE server entry.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::with_transport(name, TransportType::Sse);
        config.url = Some(url.into());
        config
    }

    /// Create a Streamable HTTP server entry.
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::with_transport(name, TransportType::StreamableHttp);
        config.url = Some(url.into());
        config
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push([key.into(), value.into()]);
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push([key.into(), value.into()]);
        self
    }

    /// Set the auto-restart budget.
    pub fn with_auto_restart(mut self, restarts: u32) -> Self {
        self.auto_restart = restarts;
        self
    }

    /// Set the SSE reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Set enabled state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check if this entry uses an HTTP-based transport.
    pub fn is_http(&self) -> bool {
        matches!(
            self.transport,
            TransportType::Sse | TransportType::StreamableHttp
        )
    }

    /// Check the entry carries what its transport needs.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::config("server name must not be empty"));
        }
        match self.transport {
            TransportType::Stdio => {
                if self.command.trim().is_empty() {
                    return Err(McpError::config(format!(
                        "server '{}': stdio transport requires a command",
                        self.name
                    )));
                }
            }
            TransportType::Sse | TransportType::StreamableHttp => {
                let url = self.url.as_deref().ok_or_else(|| {
                    McpError::config(format!("server '{}': HTTP transport requires a url", self.name))
                })?;
                url::Url::parse(url).map_err(|e| {
                    McpError::config(format!("server '{}': invalid url '{}': {}", self.name, url, e))
                })?;
            }
        }
        Ok(())
    }

    /// Process description for stdio entries.
    pub fn process_spec(&self) -> ProcessSpec {
        ProcessSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self
                .env
                .iter()
                .map(|[k, v]| (k.clone(), v.clone()))
                .collect(),
            cwd: self.cwd.clone(),
        }
    }

    /// HTTP transport settings for sse and streamable-http entries.
    pub fn http_config(&self) -> Result<HttpTransportConfig> {
        let url = self.url.clone().ok_or_else(|| {
            McpError::config(format!("server '{}': HTTP transport requires a url", self.name))
        })?;
        let mut config = HttpTransportConfig::new(url);
        config.headers = self
            .headers
            .iter()
            .map(|[k, v]| (k.clone(), v.clone()))
            .collect();
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpConfig {
    /// Client identity.
    #[serde(default)]
    pub client: ClientSettings,
    /// Configured MCP servers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl McpConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| McpError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| McpError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), servers = config.servers.len(), "loaded MCP config");
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| McpError::config(format!("cannot serialize config: {e}")))
    }

    /// Validate every server and reject duplicate names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(McpError::config(format!("duplicate server name '{}'", server.name)));
            }
        }
        Ok(())
    }

    /// Look up a server by name.
    pub fn find(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Servers with `enabled = true`.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

/// Default config location: `<config dir>/mcplink/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mcplink").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[client]
name = "probe"

[[servers]]
name = "files"
command = "mcp-server-files"
args = ["--root", "/tmp"]
env = [["DEBUG", "1"]]
auto_restart = 2

[[servers]]
name = "remote"
transport = "streamable-http"
url = "https://example.com/mcp"
headers = [["Authorization", "Bearer x"]]
connect_timeout_secs = 3

[[servers]]
name = "events"
transport = "sse"
url = "http://localhost:8000/sse"
reconnect_delay_ms = 250
enabled = false
"#;

    #[test]
    fn test_parse_sample() {
        let config = McpConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.client.name, "probe");
        assert_eq!(config.client.protocol_version, MCP_PROTOCOL_VERSION);
        assert_eq!(config.servers.len(), 3);

        let files = config.find("files").unwrap();
        assert_eq!(files.transport, TransportType::Stdio);
        assert_eq!(files.auto_restart, 2);
        let spec = files.process_spec();
        assert_eq!(spec.args, vec!["--root", "/tmp"]);
        assert_eq!(spec.env, vec![("DEBUG".to_string(), "1".to_string())]);

        let remote = config.find("remote").unwrap();
        assert!(remote.is_http());
        let http = remote.http_config().unwrap();
        assert_eq!(http.connect_timeout, Duration::from_secs(3));
        assert_eq!(http.headers[0].0, "Authorization");

        let events = config.find("events").unwrap();
        assert_eq!(events.http_config().unwrap().reconnect_delay, Duration::from_millis(250));

        let enabled: Vec<_> = config.enabled_servers().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["files", "remote"]);
    }

    #[test]
    fn test_validation_errors() {
        let missing_command = "[[servers]]\nname = \"x\"\n";
        assert!(matches!(
            McpConfig::from_toml_str(missing_command),
            Err(McpError::Config(_))
        ));

        let missing_url = "[[servers]]\nname = \"x\"\ntransport = \"sse\"\n";
        assert!(McpConfig::from_toml_str(missing_url).is_err());

        let bad_url = "[[servers]]\nname = \"x\"\ntransport = \"sse\"\nurl = \"nope\"\n";
        assert!(McpConfig::from_toml_str(bad_url).is_err());

        let duplicate = "[[servers]]\nname = \"x\"\ncommand = \"a\"\n[[servers]]\nname = \"x\"\ncommand = \"b\"\n";
        let err = McpConfig::from_toml_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let text = "[[servers]]\nname = \"x\"\ntransport = \"carrier-pigeon\"\n";
        assert!(McpConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_builders_and_roundtrip() {
        let config = McpConfig {
            client: ClientSettings::default(),
            servers: vec![
                ServerConfig::stdio("local", "server")
                    .with_arg("--flag")
                    .with_env_var("K", "V")
                    .with_auto_restart(1),
                ServerConfig::sse("events", "http://localhost/sse")
                    .with_header("X-Key", "1")
                    .with_reconnect_delay(Duration::from_millis(20)),
            ],
        };
        let text = config.to_toml().unwrap();
        let parsed = McpConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = McpConfig::load(&path).unwrap();
        assert_eq!(config.servers.len(), 3);

        let missing = McpConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("cannot read"));
    }

    #[test]
    fn test_transport_display_matches_toml_names() {
        assert_eq!(TransportType::Stdio.to_string(), "stdio");
        assert_eq!(TransportType::StreamableHttp.to_string(), "streamable-http");
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("mcplink/config.toml"));
        }
    }
}
