//! Spawning MCP server processes for the stdio transport.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::error::{McpError, Result};
use crate::transport::{StdioStreams, StdioTransporter};

/// How long a child gets to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program to execute.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables, layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    /// Create a spec for a command with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Spawn the process with all three standard streams piped.
    pub fn spawn(&self) -> Result<(Child, StdioStreams)> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::ProcessStart(format!("{}: {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ProcessStart("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ProcessStart("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::ProcessStart("failed to capture stderr".to_string()))?;

        tracing::info!(
            command = %self.command,
            args = ?self.args,
            pid = ?child.id(),
            "spawned MCP server process"
        );

        Ok((child, StdioStreams::new(stdout, stdin).with_diagnostics(stderr)))
    }
}

/// Handle on the currently running server process.
///
/// Shared with the auto-restart callback, so it always refers to the latest
/// child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<Option<Child>>>,
    restarts: Arc<Mutex<u32>>,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        Self {
            child: Arc::new(Mutex::new(Some(child))),
            restarts: Arc::new(Mutex::new(0)),
        }
    }

    /// OS process id of the current child, if it is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(Child::id)
    }

    /// How many times the process was restarted.
    pub fn restarts(&self) -> u32 {
        *self.restarts.lock()
    }

    /// Wait for the process to exit, killing it after a grace period.
    ///
    /// Closing the input stream is the transporter's job; call this after
    /// disconnecting so the server sees end of input first.
    pub async fn terminate(&self) {
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!("MCP server process did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }
    }

    /// Kill the old child and swap in a new one.
    fn replace(&self, child: Child) {
        let old = self.child.lock().replace(child);
        if let Some(mut old) = old {
            if let Err(e) = old.start_kill() {
                tracing::debug!(error = %e, "old MCP server process already gone");
            }
        }
        *self.restarts.lock() += 1;
    }
}

/// Builds stdio transporters bound to freshly spawned processes.
pub struct ProcessFactory;

impl ProcessFactory {
    /// Spawn `spec` and return a transporter reading its pipes.
    ///
    /// With `auto_restart > 0` a reconnect callback restarts the process when
    /// its pipes close unexpectedly, at most `auto_restart` times.
    pub fn create_transporter(
        spec: &ProcessSpec,
        auto_restart: u32,
    ) -> Result<(StdioTransporter, ProcessHandle)> {
        let (child, streams) = spec.spawn()?;
        let handle = ProcessHandle::new(child);
        let transporter = StdioTransporter::with_streams(streams);

        if auto_restart > 0 {
            let spec = spec.clone();
            let current = handle.clone();
            let mut remaining = auto_restart;
            transporter.add_reconnect_callback(move || {
                if remaining == 0 {
                    tracing::debug!(command = %spec.command, "auto-restart limit reached");
                    return Ok(None);
                }
                remaining -= 1;

                tracing::info!(command = %spec.command, remaining, "auto-restarting MCP server process");
                let (child, streams) = spec.spawn().inspect_err(|e| {
                    tracing::error!(command = %spec.command, error = %e, "failed to restart process");
                })?;
                current.replace(child);
                Ok(Some(streams))
            });
        }

        Ok((transporter, handle))
    }
}
