use async_trait::async_trait;
use rmcp::{
    ServiceExt,
    model::*,
    service::RunningService,
    transport::sse_client::{SseClientConfig, SseClientTransport},
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::{Session, ToolDescriptor, map_call_tool_result, map_tools_to_descriptors};
use crate::config::BackendConfig;
use crate::error::GatewayError;

/// A Server-Sent-Events MCP backend: a long-lived GET stream paired with a
/// POST endpoint for outbound requests, correlated by JSON-RPC `id` (§4.1).
pub struct SseSession {
    name: String,
    config: BackendConfig,
    service: RwLock<Option<RunningService<rmcp::RoleClient, ()>>>,
}

impl SseSession {
    pub fn new(name: String, config: BackendConfig) -> Self {
        Self {
            name,
            config,
            service: RwLock::new(None),
        }
    }

    fn build_reqwest_client(&self) -> Result<reqwest::Client, GatewayError> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        for (key, value) in &self.config.headers {
            match (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                (Ok(name), Ok(val)) => {
                    default_headers.insert(name, val);
                }
                _ => warn!(backend = %self.name, header = %key, "skipping unparseable custom header"),
            }
        }

        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .default_headers(default_headers)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build SSE client: {e}")))
    }
}

#[async_trait]
impl Session for SseSession {
    async fn initialize(&self) -> Result<(), GatewayError> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| GatewayError::Config(format!("SSE backend '{}' missing url", self.name)))?;

        let client = self.build_reqwest_client()?;
        let cfg = SseClientConfig {
            sse_endpoint: url.to_string().into(),
            ..Default::default()
        };

        let transport =
            SseClientTransport::start_with_client(client, cfg)
                .await
                .map_err(|e| GatewayError::Transport {
                    backend: self.name.clone(),
                    message: format!("failed to open SSE stream at {url}: {e}"),
                })?;

        let timeout = std::time::Duration::from_secs(self.config.options.timeout_s);
        let service = tokio::time::timeout(timeout, ().serve(transport))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
            .map_err(|e| GatewayError::Protocol {
                backend: self.name.clone(),
                message: format!("SSE MCP handshake failed at {url}: {e}"),
            })?;

        if let Some(peer) = service.peer_info() {
            info!(
                backend = %self.name,
                url = %url,
                server_name = %peer.server_info.name,
                server_version = %peer.server_info.version,
                "SSE MCP handshake complete"
            );
        }

        *self.service.write().await = Some(service);
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
        let mut guard = self.service.write().await;
        if let Some(service) = guard.take()
            && let Err(e) = service.cancel().await
        {
            error!(backend = %self.name, error = %e, "error cancelling SSE service");
        }
        info!(backend = %self.name, "SSE backend stopped");
        Ok(())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        self.list_tools().await.map(|_| ())
    }
}
