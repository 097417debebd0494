//! Gateway Surface, MCP face (C9): a single MCP endpoint exposing exactly
//! `discover_tools`, `provision_tools`, `execute_tool`,
//! `register_mcp_server`, `list_mcp_servers`, `remove_mcp_server` (§6, §4.8).

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars,
    tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::config::BackendConfig;
use crate::gateway::GatewayContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DiscoverToolsParams {
    pub query: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ProvisionToolsParams {
    #[serde(default)]
    pub tool_ids: Option<Vec<String>>,
    #[serde(default)]
    pub max_tools: Option<u32>,
    #[serde(default)]
    pub context_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteToolParams {
    pub tool_id: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RegisterMcpServerParams {
    pub name: String,
    pub config: BackendConfig,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RemoveMcpServerParams {
    pub name: String,
}

/// The MCP server exposed over stdio/SSE/streamable-HTTP to the upstream
/// client, translating each tool call directly into a `GatewayContext` call.
#[derive(Clone)]
pub struct DiscoveryGatewayServer {
    gateway: Arc<GatewayContext>,
    tool_router: ToolRouter<Self>,
}

impl DiscoveryGatewayServer {
    pub fn new(gateway: Arc<GatewayContext>) -> Self {
        Self {
            gateway,
            tool_router: Self::tool_router(),
        }
    }
}

fn text_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[tool_router]
impl DiscoveryGatewayServer {
    #[tool(description = "Ranks registered tools against a natural-language query.")]
    async fn discover_tools(
        &self,
        Parameters(params): Parameters<DiscoverToolsParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.gateway.proxy.discover_tools(
            &params.query,
            params.tags.as_deref(),
            params.context.as_deref(),
            params.limit,
        ) {
            Ok(results) => text_result(&results),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    #[tool(description = "Selects a budget-bounded subset of tools for the upstream client to use.")]
    async fn provision_tools(
        &self,
        Parameters(params): Parameters<ProvisionToolsParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = self.gateway.proxy.provision_tools(
            params.tool_ids.as_deref(),
            params.max_tools,
            params.context_tokens,
        );
        text_result(&serde_json::json!({"tools": result.tools, "metadata": result.metadata}))
    }

    #[tool(description = "Executes a tool by its fully-qualified id, proxying to the owning backend.")]
    async fn execute_tool(
        &self,
        Parameters(params): Parameters<ExecuteToolParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.gateway.proxy.execute_tool(&params.tool_id, params.arguments).await {
            Ok(result) => text_result(&result.result),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    #[tool(description = "Registers a new backend MCP server.")]
    async fn register_mcp_server(
        &self,
        Parameters(params): Parameters<RegisterMcpServerParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.gateway.proxy.register_server(&params.name, params.config).await {
            Ok(tool_count) => text_result(&serde_json::json!({"name": params.name, "tool_count": tool_count})),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    #[tool(description = "Lists every configured backend MCP server and its status.")]
    async fn list_mcp_servers(&self) -> Result<CallToolResult, McpError> {
        text_result(&self.gateway.proxy.list_servers())
    }

    #[tool(description = "Removes a backend MCP server.")]
    async fn remove_mcp_server(
        &self,
        Parameters(params): Parameters<RemoveMcpServerParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.gateway.proxy.remove_server(&params.name).await {
            Ok(()) => text_result(&serde_json::json!({"name": params.name, "removed": true})),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

#[tool_handler]
impl ServerHandler for DiscoveryGatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This gateway aggregates tools from multiple backend MCP servers. \
                 Call discover_tools to find relevant tools, provision_tools to \
                 select a budget-bounded subset, and execute_tool to invoke one \
                 by its tool_id."
                    .into(),
            ),
        }
    }
}
