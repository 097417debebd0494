//! Proxy Service (C7): validates and routes `execute_tool` to the owning
//! session via the Client Manager; publishes the public surface shared by
//! both gateway faces (§4.6).

use dashmap::DashSet;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::client_manager::ClientManager;
use crate::config::BackendConfig;
use crate::discovery::{DiscoveryResult, DiscoveryService};
use crate::error::GatewayError;
use crate::gating::{GatingResult, GatingService};
use crate::registry::ToolRegistry;

/// The set of tool ids a client has explicitly provisioned (§3
/// ProvisionedSet). Process-global per the resolved open question in
/// DESIGN.md — a multi-client deployment would need per-connection scoping.
#[derive(Default)]
pub struct ProvisionedSet {
    ids: DashSet<String>,
}

impl ProvisionedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, ids: impl IntoIterator<Item = String>) {
        self.ids.clear();
        for id in ids {
            self.ids.insert(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[derive(Debug, Serialize)]
pub struct ExecuteResult {
    pub result: Value,
}

pub struct ProxyService {
    registry: Arc<ToolRegistry>,
    client_manager: Arc<ClientManager>,
    discovery: DiscoveryService,
    gating: GatingService,
    provisioned: ProvisionedSet,
    require_provisioning: bool,
}

impl ProxyService {
    pub fn new(
        registry: Arc<ToolRegistry>,
        client_manager: Arc<ClientManager>,
        discovery: DiscoveryService,
        gating: GatingService,
        require_provisioning: bool,
    ) -> Self {
        Self {
            registry,
            client_manager,
            discovery,
            gating,
            provisioned: ProvisionedSet::new(),
            require_provisioning,
        }
    }

    /// Thin wrapper around the Discovery Service (§4.6 `discover_tools`).
    pub fn discover_tools(
        &self,
        query: &str,
        tags: Option<&[String]>,
        context: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<DiscoveryResult>, GatewayError> {
        self.discovery.discover(query, tags, context, limit)
    }

    /// Runs the Gating Service and, when enforcement is on, records the
    /// accepted ids as the provisioned set (§4.6 `provision_tools`).
    pub fn provision_tools(
        &self,
        tool_ids: Option<&[String]>,
        max_tools: Option<u32>,
        context_tokens: Option<u32>,
    ) -> GatingResult {
        let result = self.gating.gate(&self.registry, tool_ids, max_tools, context_tokens);
        if self.require_provisioning {
            self.provisioned
                .replace(result.tools.iter().map(|t| t.tool_id.clone()));
        }
        result
    }

    /// Look up `tool_id`, enforce provisioning if enabled, split into
    /// `(server, tool_name)` using the known server name as the prefix (the
    /// resolved disambiguation for tool names that themselves contain `_`),
    /// and dispatch through the Client Manager (§4.6 `execute_tool`).
    pub async fn execute_tool(&self, tool_id: &str, arguments: Option<Value>) -> Result<ExecuteResult, GatewayError> {
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| GatewayError::UnknownTool(tool_id.to_string()))?;

        if self.require_provisioning && !self.provisioned.contains(tool_id) {
            return Err(GatewayError::NotProvisioned(tool_id.to_string()));
        }

        let tool_name = tool_id
            .strip_prefix(&format!("{}_", tool.server))
            .unwrap_or(&tool.name)
            .to_string();

        let result = self.client_manager.call(&tool.server, &tool_name, arguments).await?;
        Ok(ExecuteResult { result })
    }

    /// Register a new backend into the desired set and connect it (§4.6
    /// `register_server`).
    pub async fn register_server(&self, name: &str, config: BackendConfig) -> Result<usize, GatewayError> {
        if self.client_manager.status(name).is_some_and(|s| s.connected) {
            return Err(GatewayError::Config(format!("server '{name}' already exists")));
        }
        self.client_manager.connect(name, config, &self.registry).await
    }

    pub fn list_servers(&self) -> Vec<crate::backend::ServerStatus> {
        self.client_manager.statuses()
    }

    pub async fn remove_server(&self, name: &str) -> Result<(), GatewayError> {
        if self.client_manager.status(name).is_none() {
            return Err(GatewayError::UnknownTool(name.to_string()));
        }
        self.client_manager.remove_backend(name, &self.registry).await
    }

    pub async fn reconcile(&self, desired: &HashMap<String, BackendConfig>) {
        self.client_manager.reconcile(desired, &self.registry).await;
    }
}
