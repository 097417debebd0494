//! Tool Registry (C2): in-memory store of `Tool` records keyed by
//! fully-qualified id; supports bulk replace-per-server.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A tool exposed by a connected backend (§3 Tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Globally unique id, canonical form `"<server>_<tool_name>"`.
    pub id: String,
    pub server: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub tags: BTreeSet<String>,
    pub estimated_tokens: u32,
    /// Computed lazily on first discovery touching this tool, cached until
    /// the tool is replaced (§3 Lifecycle).
    pub embedding: Option<Vec<f32>>,
}

impl Tool {
    pub fn new(
        server: &str,
        name: &str,
        description: String,
        parameters: Value,
        tags: BTreeSet<String>,
        estimated_tokens: u32,
    ) -> Self {
        Self {
            id: format!("{server}_{name}"),
            server: server.to_string(),
            name: name.to_string(),
            description,
            parameters,
            tags,
            estimated_tokens,
            embedding: None,
        }
    }
}

/// Concurrent tool registry aggregating tools from all backends.
///
/// Each backend's tool list lives behind its own `ArcSwap`, so a replace or
/// removal for one server is a single pointer swap: readers either see the
/// full old list or the full new list for that server, never a mixture
/// (§3 invariant, §5 "Registry replace-per-server is atomic"). Writers
/// across different servers proceed independently; DashMap's sharding keeps
/// reads lock-free.
pub struct ToolRegistry {
    servers: DashMap<String, ArcSwap<Vec<Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            servers: DashMap::new(),
        })
    }

    /// Atomically replace the tool set for `server` (§4.3 `replace_server`).
    pub fn replace_server(&self, server: &str, tools: Vec<Tool>) {
        let tools = Arc::new(tools);
        if let Some(slot) = self.servers.get(server) {
            slot.store(tools);
        } else {
            self.servers
                .insert(server.to_string(), ArcSwap::new(tools));
        }
    }

    /// Drop all tools for `server` (§4.3 `remove_server`).
    pub fn remove_server(&self, server: &str) {
        self.servers.remove(server);
    }

    /// Look up a tool by its fully-qualified id (§4.3 `get`).
    pub fn get(&self, id: &str) -> Option<Tool> {
        self.servers
            .iter()
            .find_map(|entry| entry.value().load().iter().find(|t| t.id == id).cloned())
    }

    /// Snapshot of every tool currently registered (§4.3 `all`).
    pub fn all(&self) -> Vec<Tool> {
        self.servers
            .iter()
            .flat_map(|entry| entry.value().load().as_ref().clone())
            .collect()
    }

    /// Tools belonging to one server (§4.3 `by_server`).
    pub fn by_server(&self, server: &str) -> Vec<Tool> {
        self.servers
            .get(server)
            .map(|s| s.load().as_ref().clone())
            .unwrap_or_default()
    }

    /// Tool count per server (§4.3 `count_by_server`).
    pub fn count_by_server(&self) -> HashMap<String, usize> {
        self.servers
            .iter()
            .map(|e| (e.key().clone(), e.value().load().len()))
            .collect()
    }

    pub fn tool_count(&self) -> usize {
        self.servers.iter().map(|e| e.value().load().len()).sum()
    }

    pub fn backend_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|e| e.key().clone()).collect()
    }

    /// Write back a lazily-computed embedding for a tool (§4.4 step 2). The
    /// registry treats the vector as opaque — it does not compute embeddings
    /// itself, only stores them (§4.3).
    pub fn set_embedding(&self, id: &str, embedding: Vec<f32>) {
        for entry in self.servers.iter() {
            let current = entry.value().load();
            if let Some(pos) = current.iter().position(|t| t.id == id) {
                let mut updated = current.as_ref().clone();
                updated[pos].embedding = Some(embedding);
                entry.value().store(Arc::new(updated));
                return;
            }
        }
    }
}
