//! Client Manager (C4): owns all backend sessions — connect/reconnect,
//! enumeration, tool-call dispatch, lifecycle.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::backend::{HealthStatus, ServerStatus, Session, ToolDescriptor, build_session};
use crate::config::BackendConfig;
use crate::error::GatewayError;
use crate::registry::{Tool, ToolRegistry};

const BASE_RECONNECT_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];
const LONG_TERM_RETRY_CAP: Duration = Duration::from_secs(60);
const CIRCUIT_THROTTLE: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ERRORS_PER_MINUTE: u32 = 10;
const HEALTH_FAILURE_THRESHOLD: u32 = 3;

fn now_epoch_secs() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// Per-backend bookkeeping for the reconnection policy and circuit breaker
/// (§4.2 "Reconnection policy", "Health checks").
#[derive(Default)]
struct HealthState {
    consecutive_failures: u32,
    incident_attempt: u32,
    error_timestamps: Vec<Instant>,
    circuit_open_until: Option<Instant>,
}

impl HealthState {
    fn record_error(&mut self, max_errors_per_minute: u32) {
        let now = Instant::now();
        self.error_timestamps.push(now);
        self.error_timestamps
            .retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        if self.error_timestamps.len() as u32 > 2 * max_errors_per_minute {
            self.circuit_open_until = Some(now + CIRCUIT_THROTTLE);
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.incident_attempt = 0;
        self.error_timestamps.clear();
        self.circuit_open_until = None;
    }

    fn record_health_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= HEALTH_FAILURE_THRESHOLD
    }

    fn is_circuit_open(&self) -> bool {
        self.circuit_open_until.is_some_and(|until| Instant::now() < until)
    }

    /// Backoff before the next reconnect attempt for the current incident.
    fn next_backoff(&self, retry_count: u32) -> Duration {
        let idx = (self.incident_attempt as usize).min(BASE_RECONNECT_DELAYS.len() - 1);
        if self.incident_attempt < retry_count {
            BASE_RECONNECT_DELAYS[idx]
        } else {
            LONG_TERM_RETRY_CAP
        }
    }
}

/// Derive lowercase tags from free text (§4.2 "tags derived from description
/// keywords"): words longer than 3 characters, deduplicated, capped at 5.
fn derive_tags(description: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for word in description.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() > 3 {
            tags.insert(word);
        }
        if tags.len() >= 5 {
            break;
        }
    }
    tags
}

/// Heuristic token cost (§4.2 `estimated_tokens` formula).
fn estimate_tokens(descriptor: &ToolDescriptor) -> u32 {
    let schema_len = serde_json::to_string(&descriptor.parameters)
        .map(|s| s.len())
        .unwrap_or(0);
    50 + descriptor.description.len().div_ceil(4) as u32 + schema_len.div_ceil(4) as u32 + 20
}

fn to_registry_tools(server: &str, descriptors: Vec<ToolDescriptor>) -> Vec<Tool> {
    descriptors
        .into_iter()
        .map(|d| {
            let tags = derive_tags(&d.description);
            let tokens = estimate_tokens(&d);
            Tool::new(server, &d.name, d.description.clone(), d.parameters.clone(), tags, tokens)
        })
        .collect()
}

/// Owns every backend session plus its declared config and observed status.
pub struct ClientManager {
    sessions: DashMap<String, Arc<dyn Session>>,
    configs: RwLock<HashMap<String, BackendConfig>>,
    statuses: DashMap<String, ServerStatus>,
    health: DashMap<String, HealthState>,
}

impl ClientManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            configs: RwLock::new(HashMap::new()),
            statuses: DashMap::new(),
            health: DashMap::new(),
        })
    }

    /// Connect to `name`, enumerate its tools, apply `tool_filter`, and
    /// publish the result to the registry (§4.2 `connect`).
    pub async fn connect(
        self: &Arc<Self>,
        name: &str,
        config: BackendConfig,
        registry: &Arc<ToolRegistry>,
    ) -> Result<usize, GatewayError> {
        self.configs.write().await.insert(name.to_string(), config.clone());
        self.statuses
            .entry(name.to_string())
            .or_insert_with(|| ServerStatus::new(name, config.enabled));

        if !config.enabled {
            return Ok(0);
        }

        let session = build_session(name, &config);
        session.initialize().await.map_err(|e| {
            self.mark_error(name, &config);
            e
        })?;

        let descriptors = session.list_tools().await?;
        let filtered: Vec<ToolDescriptor> = descriptors
            .into_iter()
            .filter(|d| config.tool_filter.allows(&d.name))
            .collect();

        let tool_count = filtered.len();
        let tools = to_registry_tools(name, filtered);
        registry.replace_server(name, tools);

        self.sessions.insert(name.to_string(), session);
        self.health.entry(name.to_string()).or_default();
        if let Some(mut h) = self.health.get_mut(name) {
            h.record_success();
        }

        self.statuses.entry(name.to_string()).and_modify(|s| {
            s.connected = true;
            s.last_seen = Some(now_epoch_secs());
            s.error_message = None;
            s.tool_count = tool_count;
            s.health_status = HealthStatus::Healthy;
        });

        info!(backend = name, tools = tool_count, "backend connected");
        Ok(tool_count)
    }

    fn mark_error(&self, name: &str, config: &BackendConfig) {
        self.health
            .entry(name.to_string())
            .or_default()
            .record_error(DEFAULT_MAX_ERRORS_PER_MINUTE);
        let _ = config;
    }

    /// Test-only seam: publish an already-constructed session directly,
    /// bypassing `build_session` so tests can wire in an in-memory mock
    /// session instead of spawning a real child process or connection.
    #[cfg(test)]
    pub(crate) async fn insert_session_for_test(
        &self,
        name: &str,
        session: Arc<dyn Session>,
        registry: &Arc<ToolRegistry>,
    ) -> Result<usize, GatewayError> {
        session.initialize().await?;
        let descriptors = session.list_tools().await?;
        let tool_count = descriptors.len();
        let tools = to_registry_tools(name, descriptors);
        registry.replace_server(name, tools);
        self.sessions.insert(name.to_string(), session);
        self.statuses
            .entry(name.to_string())
            .or_insert_with(|| ServerStatus::new(name, true));
        self.statuses.entry(name.to_string()).and_modify(|s| {
            s.connected = true;
            s.tool_count = tool_count;
        });
        self.health.entry(name.to_string()).or_default();
        Ok(tool_count)
    }

    /// Close a backend's session and drop its tools (§4.2 `disconnect`).
    pub async fn disconnect(&self, name: &str, registry: &Arc<ToolRegistry>) -> Result<(), GatewayError> {
        if let Some((_, session)) = self.sessions.remove(name)
            && let Err(e) = session.close().await
        {
            warn!(backend = name, error = %e, "error closing session");
        }
        registry.remove_server(name);
        self.configs.write().await.remove(name);
        self.statuses.entry(name.to_string()).and_modify(|s| {
            s.connected = false;
            s.tool_count = 0;
        });
        info!(backend = name, "backend disconnected");
        Ok(())
    }

    /// Remove a backend entirely, including its observed status (used by
    /// server-removal paths where the name should no longer be listed).
    pub async fn remove_backend(&self, name: &str, registry: &Arc<ToolRegistry>) -> Result<(), GatewayError> {
        self.disconnect(name, registry).await?;
        self.statuses.remove(name);
        self.health.remove(name);
        Ok(())
    }

    /// Add a new backend (alias of `connect`, kept separate for call-site
    /// clarity in the config watcher's diff/add path).
    pub async fn add_backend(
        self: &Arc<Self>,
        name: &str,
        config: BackendConfig,
        registry: &Arc<ToolRegistry>,
    ) -> Result<usize, GatewayError> {
        self.connect(name, config, registry).await
    }

    /// Reconcile the session set against a desired snapshot of backends
    /// (§4.2 `reconcile`): add missing, remove extras, reconnect changed.
    pub async fn reconcile(
        self: &Arc<Self>,
        desired: &HashMap<String, BackendConfig>,
        registry: &Arc<ToolRegistry>,
    ) {
        let current: HashMap<String, BackendConfig> = self.configs.read().await.clone();

        for name in current.keys() {
            if !desired.contains_key(name) {
                let _ = self.remove_backend(name, registry).await;
            }
        }

        for (name, config) in desired {
            let changed = current.get(name).is_none_or(|old| old != config);
            if changed {
                let _ = self.disconnect(name, registry).await;
                if let Err(e) = self.connect(name, config.clone(), registry).await {
                    error!(backend = name, error = %e, "failed to (re)connect during reconcile");
                }
            }
        }
    }

    /// Forward a tool call to the owning backend (§4.2 `call`).
    pub async fn call(&self, server: &str, tool: &str, arguments: Option<serde_json::Value>) -> Result<serde_json::Value, GatewayError> {
        let session = self
            .sessions
            .get(server)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| GatewayError::NotConnected(server.to_string()))?;

        if self.health.get(server).is_some_and(|h| h.is_circuit_open()) {
            return Err(GatewayError::NotConnected(server.to_string()));
        }

        match session.call_tool(tool, arguments).await {
            Ok(v) => {
                if let Some(mut h) = self.health.get_mut(server) {
                    h.record_success();
                }
                Ok(v)
            }
            Err(e) => {
                if let Some(mut h) = self.health.get_mut(server) {
                    h.record_error(DEFAULT_MAX_ERRORS_PER_MINUTE);
                }
                Err(e)
            }
        }
    }

    /// Snapshot of every known backend's status (§4.2 `statuses`).
    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.statuses.iter().map(|e| e.value().clone()).collect()
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        self.statuses.get(name).map(|s| s.value().clone())
    }

    pub async fn configured_names(&self) -> Vec<String> {
        self.configs.read().await.keys().cloned().collect()
    }

    /// One health-check tick over every connected backend (§4.2 "Health
    /// checks"). Three consecutive failures mark the backend unhealthy and
    /// trigger a reconnect; a reconnect attempt uses the backoff schedule
    /// tracked in [`HealthState`].
    pub async fn health_check_tick(self: &Arc<Self>, registry: &Arc<ToolRegistry>) {
        let names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let config = self.configs.read().await.get(&name).cloned();
            let Some(config) = config else { continue };
            if !config.health.enabled {
                continue;
            }
            if self.health.get(&name).is_some_and(|h| h.is_circuit_open()) {
                continue;
            }

            let session = self.sessions.get(&name).map(|r| Arc::clone(r.value()));
            let Some(session) = session else { continue };

            let timeout = Duration::from_secs(config.health.timeout_s.unwrap_or(config.options.timeout_s));
            let probe = tokio::time::timeout(timeout, session.health()).await;

            let ok = matches!(probe, Ok(Ok(())));
            self.statuses.entry(name.clone()).and_modify(|s| {
                s.last_health_check = Some(now_epoch_secs());
            });

            if ok {
                if let Some(mut h) = self.health.get_mut(&name) {
                    h.record_success();
                }
                self.statuses.entry(name.clone()).and_modify(|s| {
                    s.health_status = HealthStatus::Healthy;
                });
                continue;
            }

            let became_unhealthy = self
                .health
                .entry(name.clone())
                .or_default()
                .record_health_failure();
            self.health.entry(name.clone()).or_default().record_error(DEFAULT_MAX_ERRORS_PER_MINUTE);

            if became_unhealthy {
                self.statuses.entry(name.clone()).and_modify(|s| {
                    s.health_status = HealthStatus::Unhealthy;
                    s.connected = false;
                });
                debug!(backend = %name, "backend marked unhealthy, scheduling reconnect");
                self.attempt_reconnect(&name, config, registry).await;
            }
        }
    }

    async fn attempt_reconnect(self: &Arc<Self>, name: &str, config: BackendConfig, registry: &Arc<ToolRegistry>) {
        let backoff = self
            .health
            .get(name)
            .map(|h| h.next_backoff(config.options.retry_count))
            .unwrap_or(BASE_RECONNECT_DELAYS[0]);

        if let Some(mut h) = self.health.get_mut(name) {
            h.incident_attempt += 1;
        }

        tokio::time::sleep(backoff).await;

        let _ = self.disconnect(name, registry).await;
        match self.connect(name, config, registry).await {
            Ok(tools) => info!(backend = name, tools, "backend reconnected"),
            Err(e) => warn!(backend = name, error = %e, "reconnect attempt failed"),
        }
    }

    /// Close every session in parallel, bounded by a drain period (§5
    /// "Cancellation", shutdown drain default 10s).
    pub async fn shutdown_all(&self) {
        let sessions: Vec<(String, Arc<dyn Session>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        self.sessions.clear();

        let mut join_set = tokio::task::JoinSet::new();
        for (name, session) in sessions {
            join_set.spawn(async move {
                if let Err(e) = tokio::time::timeout(Duration::from_secs(10), session.close()).await {
                    warn!(backend = name, error = ?e, "close did not complete within drain period");
                }
            });
        }
        while join_set.join_next().await.is_some() {}
        info!("all backend sessions closed");
    }
}
