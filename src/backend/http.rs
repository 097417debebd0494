use async_trait::async_trait;
use rmcp::{
    ServiceExt,
    model::*,
    service::RunningService,
    transport::streamable_http_client::{
        StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
    },
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::lenient_client::LenientClient;
use super::{Session, ToolDescriptor, map_call_tool_result, map_tools_to_descriptors};
use crate::config::BackendConfig;
use crate::error::GatewayError;

/// A streamable-HTTP MCP backend using rmcp's reqwest-based transport.
pub struct HttpSession {
    name: String,
    config: BackendConfig,
    service: RwLock<Option<RunningService<rmcp::RoleClient, ()>>>,
}

impl HttpSession {
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
            if key.eq_ignore_ascii_case("Authorization") {
                continue;
            }
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
            .default_headers(default_headers)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn initialize(&self) -> Result<(), GatewayError> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| GatewayError::Config(format!("HTTP backend '{}' missing url", self.name)))?;

        let mut transport_config = StreamableHttpClientTransportConfig::with_uri(url);
        if let Some(auth) = self.config.headers.get("Authorization") {
            let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
            transport_config = transport_config.auth_header(token);
        }

        let reqwest_client = self.build_reqwest_client()?;
        let client = LenientClient::new(reqwest_client);
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);

        let timeout = std::time::Duration::from_secs(self.config.options.timeout_s);
        let service = tokio::time::timeout(timeout, ().serve(transport))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
            .map_err(|e| GatewayError::Protocol {
                backend: self.name.clone(),
                message: format!("HTTP MCP handshake failed at {url}: {e}"),
            })?;

        if let Some(peer) = service.peer_info() {
            info!(
                backend = %self.name,
                url = %url,
                server_name = %peer.server_info.name,
                server_version = %peer.server_info.version,
                "HTTP MCP handshake complete"
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
            error!(backend = %self.name, error = %e, "error cancelling HTTP service");
        }
        info!(backend = %self.name, "HTTP backend stopped");
        Ok(())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        self.list_tools().await.map(|_| ())
    }
}
