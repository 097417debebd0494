//! Periodic health-check driver (§4.2 "Health checks"). The actual failure
//! bookkeeping, circuit breaker, and reconnect backoff live on
//! [`crate::client_manager::ClientManager`]; this loop only supplies the
//! tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

use crate::client_manager::ClientManager;
use crate::registry::ToolRegistry;

pub async fn run(
    manager: Arc<ClientManager>,
    registry: Arc<ToolRegistry>,
    interval: Duration,
    shutdown: Arc<Notify>,
) {
    info!(interval_secs = interval.as_secs(), "health checker started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                manager.health_check_tick(&registry).await;
            }
            _ = shutdown.notified() => {
                info!("health checker shutting down");
                return;
            }
        }
    }
}
