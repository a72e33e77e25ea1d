//! Newline-delimited JSON over a pair of byte streams.
//!
//! One JSON-RPC message per line in both directions. An optional third stream
//! carries free-form diagnostics (usually the child's stderr), kept in a
//! bounded error bag so failures can quote what the server last said.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use super::{ConnectionState, Inbound, TransportKind, Transporter};
use crate::dispatch::Dispatcher;
use crate::error::{McpError, Result};
use crate::protocol::{Notification, Request};

/// Most recent diagnostic lines kept.
const ERROR_BAG_CAPACITY: usize = 100;

/// How long the diagnostics reader may keep draining after the channel closes.
const DIAGNOSTICS_GRACE: Duration = Duration::from_millis(200);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<tokio::sync::Mutex<BoxedWriter>>;

/// Callback asked for replacement streams after an unexpected close.
///
/// `Ok(None)` declines, `Ok(Some(_))` supplies new streams, and an error
/// counts as a failed attempt so the next callback is tried.
pub type ReconnectCallback = Box<dyn FnMut() -> Result<Option<StdioStreams>> + Send>;

/// The byte streams a [`StdioTransporter`] runs over.
pub struct StdioStreams {
    /// Server-to-client messages.
    pub reader: BoxedReader,
    /// Client-to-server messages.
    pub writer: BoxedWriter,
    /// Optional diagnostics stream.
    pub diagnostics: Option<BoxedReader>,
}

impl StdioStreams {
    /// Bundle a reader and a writer.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            diagnostics: None,
        }
    }

    /// Attach a diagnostics stream.
    pub fn with_diagnostics<D>(mut self, diagnostics: D) -> Self
    where
        D: AsyncRead + Send + Unpin + 'static,
    {
        self.diagnostics = Some(Box::new(diagnostics));
        self
    }
}

impl fmt::Debug for StdioStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioStreams")
            .field("diagnostics", &self.diagnostics.is_some())
            .finish_non_exhaustive()
    }
}

struct StdioInner {
    state: Mutex<ConnectionState>,
    /// Bumped on every bind and teardown; tasks from older bindings go quiet.
    generation: AtomicU64,
    pending_streams: Mutex<Option<StdioStreams>>,
    writer: Mutex<Option<SharedWriter>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    diagnostics_task: Mutex<Option<JoinHandle<()>>>,
    error_bag: Mutex<VecDeque<String>>,
    reconnect_callbacks: Mutex<Vec<ReconnectCallback>>,
    inbound: Inbound,
}

/// Transporter over newline-delimited JSON streams.
pub struct StdioTransporter {
    inner: Arc<StdioInner>,
}

impl StdioTransporter {
    /// Create a transporter without streams. Bind them with [`set_streams`](Self::set_streams).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StdioInner {
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                pending_streams: Mutex::new(None),
                writer: Mutex::new(None),
                reader_task: Mutex::new(None),
                diagnostics_task: Mutex::new(None),
                error_bag: Mutex::new(VecDeque::new()),
                reconnect_callbacks: Mutex::new(Vec::new()),
                inbound: Inbound::default(),
            }),
        }
    }

    /// Create a transporter bound to the given streams.
    pub fn with_streams(streams: StdioStreams) -> Self {
        let transporter = Self::new();
        *transporter.inner.pending_streams.lock() = Some(streams);
        transporter
    }

    /// Rebind to new streams, disconnecting first when connected.
    pub async fn set_streams(&self, streams: StdioStreams) -> Result<()> {
        if self.is_connected() {
            self.disconnect().await?;
        }
        *self.inner.pending_streams.lock() = Some(streams);
        Ok(())
    }

    /// Register a reconnect callback. Callbacks run in registration order.
    pub fn add_reconnect_callback<F>(&self, callback: F)
    where
        F: FnMut() -> Result<Option<StdioStreams>> + Send + 'static,
    {
        self.inner.reconnect_callbacks.lock().push(Box::new(callback));
    }

    /// Number of registered reconnect callbacks.
    pub fn reconnect_callback_count(&self) -> usize {
        self.inner.reconnect_callbacks.lock().len()
    }
}

impl Default for StdioTransporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdioTransporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioTransporter")
            .field("state", &*self.inner.state.lock())
            .field("diagnostics", &self.inner.error_bag.lock().len())
            .finish()
    }
}

impl StdioInner {
    /// Start reading from freshly bound streams and mark the channel connected.
    fn start(self: &Arc<Self>, streams: StdioStreams) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.writer.lock() = Some(Arc::new(tokio::sync::Mutex::new(streams.writer)));
        *self.state.lock() = ConnectionState::Connected;

        let reader = tokio::spawn(read_loop(Arc::clone(self), streams.reader, generation));
        if let Some(old) = self.reader_task.lock().replace(reader) {
            old.abort();
        }

        let diagnostics = streams
            .diagnostics
            .map(|stream| tokio::spawn(diagnostics_loop(Arc::clone(self), stream)));
        if let Some(old) = std::mem::replace(&mut *self.diagnostics_task.lock(), diagnostics) {
            old.abort();
        }

        tracing::debug!(generation, "stdio channel connected");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn current_writer(&self) -> Result<(SharedWriter, u64)> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(McpError::NotConnected);
        }
        let writer = self.writer.lock().clone().ok_or(McpError::NotConnected)?;
        Ok((writer, self.generation.load(Ordering::SeqCst)))
    }

    /// Decode one line from the server and dispatch it.
    fn handle_line(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(message) => {
                self.inbound.deliver(message);
            }
            Err(e) => {
                tracing::error!(error = %e, line = %text, "dropping undecodable line from MCP server");
            }
        }
    }

    fn record_diagnostic(&self, line: &str) {
        tracing::warn!(line = %line, "MCP server stderr");
        let mut bag = self.error_bag.lock();
        if bag.len() == ERROR_BAG_CAPACITY {
            bag.pop_front();
        }
        bag.push_back(line.to_string());
    }

    fn diagnostics(&self) -> Vec<String> {
        self.error_bag.lock().iter().cloned().collect()
    }

    /// React to either half of the channel closing underneath us.
    ///
    /// `abort_reader` is false when called from the reader task itself.
    async fn handle_close(self: &Arc<Self>, generation: u64, reason: &str, abort_reader: bool) {
        {
            let mut state = self.state.lock();
            if !self.is_current(generation) || *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        self.writer.lock().take();
        let reader = self.reader_task.lock().take();
        if let Some(reader) = reader.filter(|_| abort_reader) {
            reader.abort();
        }

        let diagnostics_task = self.diagnostics_task.lock().take();
        if let Some(mut handle) = diagnostics_task {
            if tokio::time::timeout(DIAGNOSTICS_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        tracing::warn!(reason, "stdio channel closed unexpectedly");
        self.inbound.connection_lost(reason, self.diagnostics());
        self.inbound.clear();

        self.heal();
    }

    /// Ask the reconnect callbacks, in order, for replacement streams.
    ///
    /// The callbacks run outside the registry lock, so a callback may register
    /// further callbacks. Those are appended after the existing ones.
    fn heal(self: &Arc<Self>) -> bool {
        let mut callbacks = std::mem::take(&mut *self.reconnect_callbacks.lock());
        let mut streams = None;
        for (index, callback) in callbacks.iter_mut().enumerate() {
            match callback() {
                Ok(Some(supplied)) => {
                    streams = Some(supplied);
                    break;
                }
                Ok(None) => tracing::debug!(index, "reconnect callback declined"),
                Err(e) => tracing::error!(index, error = %e, "reconnect callback failed"),
            }
        }
        let asked = !callbacks.is_empty();
        {
            let mut registry = self.reconnect_callbacks.lock();
            let added = std::mem::replace(&mut *registry, callbacks);
            registry.extend(added);
        }

        match streams {
            Some(streams) => {
                self.start(streams);
                tracing::info!("stdio channel restored with replacement streams");
                true
            }
            None => {
                if asked {
                    tracing::error!("no reconnect callback supplied streams, staying disconnected");
                }
                false
            }
        }
    }
}

async fn read_loop(inner: Arc<StdioInner>, reader: BoxedReader, generation: u64) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) if line.last() != Some(&b'\n') => {
                tracing::debug!(bytes = line.len(), "discarding unterminated line");
                break;
            }
            Ok(_) => inner.handle_line(&line),
            Err(e) => {
                tracing::warn!(error = %e, "error reading from MCP server");
                break;
            }
        }
    }
    inner
        .handle_close(generation, "server output stream closed", false)
        .await;
}

async fn diagnostics_loop(inner: Arc<StdioInner>, reader: BoxedReader) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    inner.record_diagnostic(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading MCP server stderr");
                break;
            }
        }
    }
}

async fn write_line(writer: &SharedWriter, line: &[u8]) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(line).await?;
    writer.flush().await
}

#[async_trait]
impl Transporter for StdioTransporter {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let streams = self.inner.pending_streams.lock().take().ok_or_else(|| {
            McpError::InvalidStreams("no input/output streams bound".to_string())
        })?;
        self.inner.start(streams);
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
        let (writer, generation) = self.inner.current_writer()?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');

        self.inner.inbound.track(request);
        if let Err(e) = write_line(&writer, &line).await {
            self.inner.inbound.forget(&request.id);
            tracing::error!(id = %request.id, error = %e, "failed to send request");
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    inner
                        .handle_close(generation, "server input stream closed", true)
                        .await;
                });
            }
            return Err(e.into());
        }

        tracing::debug!(id = %request.id, method = %request.method, "sent request");
        Ok(())
    }

    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        let (writer, _) = self.inner.current_writer()?;
        let mut line = serde_json::to_vec(notification)?;
        line.push(b'\n');
        write_line(&writer, &line).await?;
        tracing::debug!(method = %notification.method, "sent notification");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.inner.state.lock() = ConnectionState::Disconnected;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let writer = self.inner.writer.lock().take();
        if let Some(writer) = writer {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server input");
            }
        }
        if let Some(task) = self.inner.reader_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.inner.diagnostics_task.lock().take() {
            task.abort();
        }
        self.inner.inbound.clear();

        tracing::debug!("disconnected stdio channel");
        Ok(())
    }

    fn clear_request_map(&self) {
        self.inner.inbound.clear();
    }

    fn diagnostics(&self) -> Vec<String> {
        self.inner.diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::dispatch::DispatchEvent;

    async fn eventually(condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_connect_without_streams() {
        let transporter = StdioTransporter::new();
        let err = transporter.connect().await.unwrap_err();
        assert!(matches!(err, McpError::InvalidStreams(_)));
        assert_eq!(transporter.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let (a, _b) = tokio::io::duplex(64);
        let (c, _d) = tokio::io::duplex(64);
        let transporter = StdioTransporter::with_streams(StdioStreams::new(a, c));
        let err = transporter
            .send_request(&Request::new("ping", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected));
    }

    #[tokio::test]
    async fn test_request_is_one_line() {
        let (client_read, _server_write) = tokio::io::duplex(1024);
        let (client_write, mut server_read) = tokio::io::duplex(1024);
        let transporter = StdioTransporter::with_streams(StdioStreams::new(client_read, client_write));
        transporter.connect().await.unwrap();

        transporter
            .send_request(&Request::new("ping", None).with_id("1"))
            .await
            .unwrap();

        let mut buf = vec![0u8; 256];
        let n = server_read.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert_eq!(text, "{\"id\":\"1\",\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n");

        transporter.disconnect().await.unwrap();
        assert!(!transporter.is_connected());
    }

    #[test]
    fn test_error_bag_is_bounded() {
        let transporter = StdioTransporter::new();
        for i in 0..(ERROR_BAG_CAPACITY + 5) {
            transporter.inner.record_diagnostic(&format!("line {i}"));
        }
        let diagnostics = transporter.diagnostics();
        assert_eq!(diagnostics.len(), ERROR_BAG_CAPACITY);
        assert_eq!(diagnostics[0], "line 5");
        assert_eq!(diagnostics.last().unwrap(), &format!("line {}", ERROR_BAG_CAPACITY + 4));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_decoded_lossily() {
        let (client_read, mut server_write) = tokio::io::duplex(1024);
        let (client_write, _server_read) = tokio::io::duplex(1024);
        let transporter = StdioTransporter::with_streams(StdioStreams::new(client_read, client_write));

        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.add_listener(move |event| {
            if let DispatchEvent::Response(event) = event {
                sink.lock().push(event.message["params"]["text"].clone());
            }
        });
        transporter.listen(dispatcher).await.unwrap();

        server_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"log\",\"params\":{\"text\":\"a\xffb\"}}\n")
            .await
            .unwrap();
        eventually(|| seen.lock().len() == 1).await;
        assert_eq!(seen.lock()[0], Value::String("a\u{fffd}b".to_string()));
    }

    #[tokio::test]
    async fn test_diagnostics_keep_last_unterminated_line() {
        let (client_read, _server_write) = tokio::io::duplex(1024);
        let (client_write, _server_read) = tokio::io::duplex(1024);
        let (stderr_read, mut stderr_write) = tokio::io::duplex(1024);
        let transporter = StdioTransporter::with_streams(
            StdioStreams::new(client_read, client_write).with_diagnostics(stderr_read),
        );
        transporter.connect().await.unwrap();

        stderr_write.write_all(b"starting\r\n\nfatal: no config").await.unwrap();
        drop(stderr_write);
        eventually(|| transporter.diagnostics().len() == 2).await;
        assert_eq!(transporter.diagnostics(), ["starting", "fatal: no config"]);
    }

    #[test]
    fn test_callback_may_register_callbacks() {
        let transporter = Arc::new(StdioTransporter::new());
        let weak = Arc::downgrade(&transporter);
        transporter.add_reconnect_callback(move || {
            if let Some(transporter) = weak.upgrade() {
                transporter.add_reconnect_callback(|| Ok(None));
            }
            Ok(None)
        });

        assert!(!transporter.inner.heal());
        assert_eq!(transporter.reconnect_callback_count(), 2);
        assert!(!transporter.inner.heal());
        assert_eq!(transporter.reconnect_callback_count(), 3);
    }
}
