use async_trait::async_trait;
use rmcp::{ServiceExt, model::*, service::RunningService};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{Session, ToolDescriptor, map_call_tool_result, map_tools_to_descriptors};
use crate::config::BackendConfig;
use crate::error::GatewayError;

/// A stdio child-process MCP backend.
///
/// Spawns the child directly (rather than through a shell) so the `Child`
/// handle is retained for crash detection and process-group kill on close.
/// Banner tolerance — non-JSON lines on stdout before the first well-formed
/// JSON-RPC frame — is handled by rmcp's `transport-io` framing, which
/// discards unparsable lines rather than erroring (§4.1, §9 "must tolerate
/// leading non-JSON output without propagating parse errors"). stderr is a
/// separate stream: it is piped and a background task forwards each line to
/// the gateway's own logs tagged with the backend name, rather than being
/// silently discarded.
pub struct StdioSession {
    name: String,
    config: BackendConfig,
    service: RwLock<Option<RunningService<rmcp::RoleClient, ()>>>,
    child: RwLock<Option<tokio::process::Child>>,
}

impl StdioSession {
    pub fn new(name: String, config: BackendConfig) -> Self {
        Self {
            name,
            config,
            service: RwLock::new(None),
            child: RwLock::new(None),
        }
    }

    fn build_command(&self) -> Result<Command, GatewayError> {
        let cmd_str = self.config.command.as_deref().ok_or_else(|| {
            GatewayError::Config(format!("stdio backend '{}' missing command", self.name))
        })?;
        let mut cmd = Command::new(cmd_str);
        if !self.config.args.is_empty() {
            cmd.args(&self.config.args);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        Ok(cmd)
    }

    /// Kill the child's process group (unix), falling back to killing just
    /// the child elsewhere.
    async fn kill_child(&self, child: &mut tokio::process::Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            let ret = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
            if ret == 0 {
                debug!(backend = %self.name, pid, "sent SIGTERM to process group");
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            } else {
                warn!(backend = %self.name, pid, "failed to signal process group, killing child directly");
            }
        }
        let _ = child.kill().await;
    }
}

#[async_trait]
impl Session for StdioSession {
    async fn initialize(&self) -> Result<(), GatewayError> {
        let mut cmd = self.build_command()?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| GatewayError::Transport {
            backend: self.name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        let pid = child.id();
        debug!(backend = %self.name, pid = ?pid, "spawned child process");

        let stdout = child.stdout.take().ok_or_else(|| GatewayError::Transport {
            backend: self.name.clone(),
            message: "failed to capture stdout".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| GatewayError::Transport {
            backend: self.name.clone(),
            message: "failed to capture stdin".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| GatewayError::Transport {
            backend: self.name.clone(),
            message: "failed to capture stderr".to_string(),
        })?;

        let stderr_backend = self.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => warn!(backend = %stderr_backend, "{line}"),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(backend = %stderr_backend, error = %e, "stderr reader stopped");
                        break;
                    }
                }
            }
        });

        let timeout = std::time::Duration::from_secs(self.config.options.timeout_s);
        let service = tokio::time::timeout(timeout, ().serve((stdout, stdin)))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
            .map_err(|e| GatewayError::Protocol {
                backend: self.name.clone(),
                message: format!("MCP handshake failed: {e}"),
            })?;

        if let Some(peer) = service.peer_info() {
            info!(
                backend = %self.name,
                pid = ?pid,
                server_name = %peer.server_info.name,
                server_version = %peer.server_info.version,
                "MCP handshake complete"
            );
        }

        *self.service.write().await = Some(service);
        *self.child.write().await = Some(child);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| GatewayError::NotConnected(self.name.clone()))?;
        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| GatewayError::Protocol {
                backend: self.name.clone(),
                message: format!("tool discovery failed: {e}"),
            })?;
        Ok(map_tools_to_descriptors(tools))
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, GatewayError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| GatewayError::NotConnected(self.name.clone()))?;

        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments: arguments.and_then(|v| v.as_object().cloned()),
            task: None,
        };

        let timeout = std::time::Duration::from_secs(self.config.options.timeout_s);
        let result = tokio::time::timeout(timeout, service.call_tool(params))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
            .map_err(|e| GatewayError::Tool {
                backend: self.name.clone(),
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(map_call_tool_result(result))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if let Some(service) = self.service.write().await.take()
            && let Err(e) = service.cancel().await
        {
            error!(backend = %self.name, error = %e, "error cancelling service");
        }
        if let Some(mut child) = self.child.write().await.take() {
            self.kill_child(&mut child).await;
        }
        info!(backend = %self.name, "backend stopped");
        Ok(())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        self.list_tools().await.map(|_| ())
    }
}
