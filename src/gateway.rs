//! Explicit gateway context (§9 design note: replace process-wide service
//! singletons with a context constructed once at startup and passed to
//! request handlers).

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::client_manager::ClientManager;
use crate::config::Config;
use crate::discovery::DiscoveryService;
use crate::embeddings::EmbeddingEncoder;
use crate::gating::GatingService;
use crate::proxy::ProxyService;
use crate::registry::ToolRegistry;

/// Everything a request handler needs: registry, client manager, and the
/// derived services, bundled once at startup.
pub struct GatewayContext {
    pub registry: Arc<ToolRegistry>,
    pub client_manager: Arc<ClientManager>,
    pub proxy: Arc<ProxyService>,
    pub shutdown: Arc<tokio::sync::Notify>,
    pub started_at: tokio::time::Instant,
}

impl GatewayContext {
    pub fn new(config: &Config, encoder: Arc<dyn EmbeddingEncoder>) -> Self {
        let registry = ToolRegistry::new();
        let client_manager = ClientManager::new();
        let discovery = DiscoveryService::new(Arc::clone(&registry), encoder);
        let gating = GatingService::new(config.gateway.max_tools_per_request, config.gateway.max_tokens_per_request);
        let proxy = Arc::new(ProxyService::new(
            Arc::clone(&registry),
            Arc::clone(&client_manager),
            discovery,
            gating,
            config.gateway.require_provisioning,
        ));

        Self {
            registry,
            client_manager,
            proxy,
            shutdown: Arc::new(tokio::sync::Notify::new()),
            started_at: tokio::time::Instant::now(),
        }
    }

    /// Connect every configured backend concurrently (startup only; later
    /// changes flow through the config watcher's reconcile path).
    pub async fn connect_all(self: &Arc<Self>, config: &Config) {
        let mut join_set = tokio::task::JoinSet::new();
        for (name, backend_config) in config.backends.clone() {
            let manager = Arc::clone(&self.client_manager);
            let registry = Arc::clone(&self.registry);
            join_set.spawn(async move {
                match manager.connect(&name, backend_config, &registry).await {
                    Ok(tools) => info!(backend = %name, tools, "backend connected at startup"),
                    Err(e) => error!(backend = %name, error = %e, "backend failed to connect at startup"),
                }
            });
        }
        while join_set.join_next().await.is_some() {}

        info!(
            total_tools = self.registry.tool_count(),
            total_backends = self.registry.backend_count(),
            "initial backend connection pass complete"
        );
    }

    /// Teardown in reverse order of construction: stop accepting work,
    /// close every session, leave the registry to drop with the process.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        self.client_manager.shutdown_all().await;
        warn!("gateway context shut down");
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
