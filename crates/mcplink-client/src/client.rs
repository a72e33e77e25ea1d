//! MCP client for communicating with MCP servers.
//!
//! [`McpClient`] pairs a [`Transporter`] with a [`Correlator`]: requests are
//! registered under their id, transmitted on a background task, and settled
//! when the dispatcher hands back the matching response.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::config::{ClientSettings, ServerConfig, TransportType};
use crate::correlator::{Correlator, ReplyCallback, ResponseFuture};
use crate::dispatch::{Dispatcher, ListenerId};
use crate::error::{McpError, Result};
use crate::process::{ProcessFactory, ProcessHandle, ProcessSpec};
use crate::protocol::{
    CallToolResult, CompleteResult, GetPromptResult, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    MCP_PROTOCOL_VERSION, Notification, ReadResourceResult, Reply, Request, RpcResult,
};
use crate::transport::{
    HttpTransportConfig, SseTransporter, StdioStreams, StdioTransporter,
    StreamableHttpTransporter, TransportKind, Transporter,
};

/// An MCP client bound to a single server.
pub struct McpClient {
    transporter: Arc<dyn Transporter>,
    dispatcher: Dispatcher,
    correlator: Arc<Correlator>,
    listener: ListenerId,
    process: Option<ProcessHandle>,
    protocol_version: String,
    capabilities: Map<String, Value>,
    client_info: Map<String, Value>,
    server: RwLock<Option<InitializeResult>>,
}

impl McpClient {
    /// Create a client over any transporter.
    pub fn new(transporter: Arc<dyn Transporter>) -> Self {
        Self::with_dispatcher(transporter, Dispatcher::new())
    }

    /// Create a client that routes inbound messages through `dispatcher`.
    ///
    /// Extra listeners on the dispatcher see every inbound message, including
    /// server notifications.
    pub fn with_dispatcher(transporter: Arc<dyn Transporter>, dispatcher: Dispatcher) -> Self {
        let correlator = Arc::new(Correlator::new());
        let sink = Arc::clone(&correlator);
        let listener = dispatcher.add_listener(move |event| sink.handle_event(event));

        Self {
            transporter,
            dispatcher,
            correlator,
            listener,
            process: None,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Map::new(),
            client_info: Map::new(),
            server: RwLock::new(None),
        }
    }

    /// Create a client over caller-supplied byte streams.
    pub fn with_stdio_streams(streams: StdioStreams) -> Self {
        Self::new(Arc::new(StdioTransporter::with_streams(streams)))
    }

    /// Spawn a server process and create a client over its pipes.
    pub fn with_process(spec: &ProcessSpec, auto_restart: u32) -> Result<Self> {
        let (transporter, process) = ProcessFactory::create_transporter(spec, auto_restart)?;
        let mut client = Self::new(Arc::new(transporter));
        client.process = Some(process);
        Ok(client)
    }

    /// Create a client over an SSE stream.
    pub fn with_sse(config: HttpTransportConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(SseTransporter::new(config)?)))
    }

    /// Create a client over Streamable HTTP.
    pub fn with_streamable_http(config: HttpTransportConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(StreamableHttpTransporter::new(config)?)))
    }

    /// Create a client from a server config entry.
    ///
    /// Stdio entries spawn their process here.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        match config.transport {
            TransportType::Stdio => Self::with_process(&config.process_spec(), config.auto_restart),
            TransportType::Sse => Self::with_sse(config.http_config()?),
            TransportType::StreamableHttp => Self::with_streamable_http(config.http_config()?),
        }
    }

    /// Set the client info announced during initialization.
    pub fn with_client_info(mut self, info: Map<String, Value>) -> Self {
        self.client_info = info;
        self
    }

    /// Set the capabilities announced during initialization.
    pub fn with_capabilities(mut self, capabilities: Map<String, Value>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the protocol version requested during initialization.
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Apply the `[client]` table of a config file.
    pub fn with_settings(self, settings: &ClientSettings) -> Self {
        let mut info = Map::new();
        info.insert("name".into(), json!(settings.name));
        if let Some(version) = &settings.version {
            info.insert("version".into(), json!(version));
        }
        self.with_client_info(info)
            .with_protocol_version(settings.protocol_version.clone())
    }

    /// The underlying transporter.
    pub fn transporter(&self) -> &Arc<dyn Transporter> {
        &self.transporter
    }

    /// The transport kind.
    pub fn kind(&self) -> TransportKind {
        self.transporter.kind()
    }

    /// The dispatcher inbound messages flow through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The spawned server process, for stdio clients created from a spec.
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Result of the last successful initialization.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().clone()
    }

    /// Check if the transporter is connected.
    pub fn is_connected(&self) -> bool {
        self.transporter.is_connected()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Recent diagnostic output from the server.
    pub fn diagnostics(&self) -> Vec<String> {
        self.transporter.diagnostics()
    }

    /// Connect and run the initialize handshake.
    ///
    /// On failure the transporter is torn down again, so the client never
    /// reports itself connected without a completed handshake.
    pub async fn connect(&self) -> Result<InitializeResult> {
        match self.handshake().await {
            Ok(result) => {
                tracing::info!(
                    server = %result.server_info.name,
                    version = %result.server_info.version,
                    protocol = %result.protocol_version,
                    transport = %self.kind(),
                    "MCP server initialized"
                );
                *self.server.write() = Some(result.clone());
                Ok(result)
            }
            Err(err) => {
                tracing::error!(transport = %self.kind(), error = %err, "MCP handshake failed");
                if let Err(e) = self.transporter.disconnect().await {
                    tracing::debug!(error = %e, "error tearing down after failed handshake");
                }
                self.transporter.clear_request_map();
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult> {
        self.transporter
            .listen(self.dispatcher.clone())
            .await
            .map_err(McpError::connection_failed)?;

        let params = InitializeParams::new(
            self.protocol_version.clone(),
            &self.capabilities,
            &self.client_info,
        );
        let request = Request::new("initialize", Some(serde_json::to_value(&params)?));
        let reply = self
            .send_request_async(request)
            .await
            .map_err(McpError::connection_failed)?;

        let result = match reply
            .into_typed::<InitializeResult>()
            .map_err(McpError::connection_failed)?
        {
            Ok(result) => result,
            Err(err) => {
                return Err(McpError::connection_failed(McpError::protocol(format!(
                    "initialize rejected: {err}"
                ))));
            }
        };

        self.notify(Notification::new("notifications/initialized", None))
            .await
            .map_err(McpError::connection_failed)?;

        Ok(result)
    }

    /// Send a request, optionally with a callback fired when its response arrives.
    ///
    /// Must be called within a tokio runtime; transmission runs on a spawned
    /// task so many requests can be in flight at once. A request whose id is
    /// already pending is rejected without touching the transport.
    pub fn send_request(&self, request: Request, callback: Option<ReplyCallback>) -> ResponseFuture {
        let future = match self.correlator.register(&request, callback) {
            Ok(future) => future,
            Err(err) => return ResponseFuture::failed(err),
        };

        let transporter = Arc::clone(&self.transporter);
        let correlator = Arc::clone(&self.correlator);
        tokio::spawn(async move {
            if let Err(err) = transporter.send_request(&request).await {
                tracing::debug!(id = %request.id, error = %err, "request failed before a response");
                correlator.fail(&request.id, err);
            }
        });

        future
    }

    /// Send a request and get a future for its reply.
    pub fn send_request_async(&self, request: Request) -> ResponseFuture {
        self.send_request(request, None)
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, notification: Notification) -> Result<()> {
        self.transporter.send_notification(&notification).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<RpcResult<T>> {
        let reply: Reply = self
            .send_request_async(Request::new(method, params))
            .await?;
        reply.into_typed()
    }

    async fn call_empty(&self, method: &str, params: Option<Value>) -> Result<RpcResult<()>> {
        Ok(self.call::<Value>(method, params).await?.map(|_| ()))
    }

    /// Check the server is alive.
    pub async fn ping(&self) -> Result<RpcResult<()>> {
        self.call_empty("ping", None).await
    }

    /// List available tools.
    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<RpcResult<ListToolsResult>> {
        self.call("tools/list", cursor_params(cursor)).await
    }

    /// Call a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<RpcResult<CallToolResult>> {
        let params = json!({
            "name": name,
            "arguments": arguments.unwrap_or_else(|| json!({})),
        });
        self.call("tools/call", Some(params)).await
    }

    /// List available resources.
    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<RpcResult<ListResourcesResult>> {
        self.call("resources/list", cursor_params(cursor)).await
    }

    /// List resource templates.
    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<RpcResult<ListResourceTemplatesResult>> {
        self.call("resources/templates/list", cursor_params(cursor))
            .await
    }

    /// Read a resource.
    pub async fn read_resource(&self, uri: &str) -> Result<RpcResult<ReadResourceResult>> {
        self.call("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    /// Subscribe to updates of a resource.
    pub async fn subscribe(&self, uri: &str) -> Result<RpcResult<()>> {
        self.call_empty("resources/subscribe", Some(json!({ "uri": uri })))
            .await
    }

    /// Cancel a resource subscription.
    pub async fn unsubscribe(&self, uri: &str) -> Result<RpcResult<()>> {
        self.call_empty("resources/unsubscribe", Some(json!({ "uri": uri })))
            .await
    }

    /// List available prompts.
    pub async fn list_prompts(&self, cursor: Option<&str>) -> Result<RpcResult<ListPromptsResult>> {
        self.call("prompts/list", cursor_params(cursor)).await
    }

    /// Render a prompt.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<RpcResult<GetPromptResult>> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.call("prompts/get", Some(params)).await
    }

    /// Ask for argument completions.
    ///
    /// `reference` is a `ref/prompt` or `ref/resource` object.
    pub async fn complete(
        &self,
        reference: Value,
        argument: &str,
        value: &str,
    ) -> Result<RpcResult<CompleteResult>> {
        let params = json!({
            "ref": reference,
            "argument": { "name": argument, "value": value },
        });
        self.call("completion/complete", Some(params)).await
    }

    /// Set the server's logging level.
    pub async fn set_level(&self, level: &str) -> Result<RpcResult<()>> {
        self.call_empty("logging/setLevel", Some(json!({ "level": level })))
            .await
    }

    /// Tear the connection down.
    ///
    /// Every pending request is rejected with [`McpError::ConnectionClosed`]
    /// before the transporter goes away. An owned process is then given time
    /// to exit.
    pub async fn disconnect(&self) -> Result<()> {
        let rejected = self.correlator.reject_all(|| McpError::ConnectionClosed);
        if rejected > 0 {
            tracing::debug!(rejected, "rejected pending requests on disconnect");
        }

        let outcome = self.transporter.disconnect().await;
        self.transporter.clear_request_map();
        if let Some(process) = &self.process {
            process.terminate().await;
        }
        self.server.write().take();

        tracing::info!(transport = %self.kind(), "MCP client disconnected");
        outcome
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.dispatcher.remove_listener(self.listener);
        self.correlator.reject_all(|| McpError::ConnectionClosed);
    }
}

impl fmt::Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpClient")
            .field("transport", &self.kind())
            .field("state", &self.transporter.state())
            .field("pending", &self.pending_requests())
            .field("protocol_version", &self.protocol_version)
            .finish()
    }
}

fn cursor_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| json!({ "cursor": c }))
}
