//! Transport Adapters (C3): three implementations of a uniform `Session`
//! capability set — stdio, sse, streamable-http.

pub mod health;
pub mod http;
pub mod lenient_client;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::{BackendConfig, Transport};
use crate::error::GatewayError;

/// A tool as enumerated by a backend, before it is turned into a registry
/// [`crate::registry::Tool`] by the Client Manager.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Capability set shared by every transport (§4.1).
///
/// `id` allocation, per-request timeouts, and pending-waiter bookkeeping are
/// transport details owned by each adapter; callers only see this surface.
#[async_trait]
pub trait Session: Send + Sync {
    async fn initialize(&self) -> Result<(), GatewayError>;
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError>;
    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, GatewayError>;
    async fn close(&self) -> Result<(), GatewayError>;
    /// Lightweight liveness probe used by the health checker (§4.2).
    async fn health(&self) -> Result<(), GatewayError>;
}

/// Construct the adapter matching a backend's configured transport.
pub fn build_session(name: &str, config: &BackendConfig) -> Arc<dyn Session> {
    match config.transport {
        Transport::Stdio => Arc::new(stdio::StdioSession::new(name.to_string(), config.clone())),
        Transport::StreamableHttp => {
            Arc::new(http::HttpSession::new(name.to_string(), config.clone()))
        }
        Transport::Sse => Arc::new(sse::SseSession::new(name.to_string(), config.clone())),
    }
}

/// Observable per-backend state (§3 ServerStatus, §4.2 reconnection policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Full observable status for one backend (§3 ServerStatus).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub enabled: bool,
    pub connected: bool,
    pub last_seen: Option<String>,
    pub error_message: Option<String>,
    pub tool_count: usize,
    pub health_status: HealthStatus,
    pub last_health_check: Option<String>,
}

impl ServerStatus {
    pub fn new(name: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            connected: false,
            last_seen: None,
            error_message: None,
            tool_count: 0,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
        }
    }
}

/// Map an rmcp `CallToolResult` into a plain JSON value (shared by every
/// rmcp-backed transport).
pub(crate) fn map_call_tool_result(result: rmcp::model::CallToolResult) -> Value {
    let contents: Vec<Value> = result
        .content
        .into_iter()
        .map(|c| match c.raw {
            rmcp::model::RawContent::Text(t) => Value::String(t.text),
            _ => Value::String("[non-text content]".to_string()),
        })
        .collect();

    if contents.len() == 1 {
        contents.into_iter().next().unwrap()
    } else {
        Value::Array(contents)
    }
}

/// Map rmcp's `Tool` list into [`ToolDescriptor`]s.
pub(crate) fn map_tools_to_descriptors(tools: Vec<rmcp::model::Tool>) -> Vec<ToolDescriptor> {
    tools
        .into_iter()
        .map(|t| ToolDescriptor {
            name: t.name.to_string(),
            description: t.description.unwrap_or_default().to_string(),
            parameters: serde_json::to_value(&t.input_schema)
                .unwrap_or(Value::Object(Default::default())),
        })
        .collect()
}
