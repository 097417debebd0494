//! Gateway Surface, HTTP face (C9): REST endpoints under `/api/…` (§6).
//! A thin translator — all business logic lives in [`crate::gateway::GatewayContext`].

#[cfg(feature = "http-api")]
pub mod api {
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        routing::{delete, get, post},
    };
    use rmcp::transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    use crate::config::BackendConfig;
    use crate::error::GatewayError;
    use crate::gateway::GatewayContext;
    use crate::mcp_server::DiscoveryGatewayServer;

    pub async fn start(
        gateway: Arc<GatewayContext>,
        host: &str,
        port: u16,
        port_explicit: bool,
    ) -> anyhow::Result<u16> {
        let app = build_router(gateway.clone());
        let (listener, bound_port) = bind_with_fallback(host, port, port_explicit).await?;
        info!(host = %host, port = bound_port, "HTTP API listening");
        let shutdown = gateway.shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await
        });
        Ok(bound_port)
    }

    /// Bind to `port`. If it's occupied and the caller did not pin the port
    /// explicitly via `PORT`, try the next free port in `+1..=+24` (§6 "Port
    /// binding"); an explicitly-set `PORT` fails hard on conflict instead.
    async fn bind_with_fallback(host: &str, port: u16, port_explicit: bool) -> anyhow::Result<(TcpListener, u16)> {
        if port_explicit {
            let listener = TcpListener::bind((host, port)).await?;
            return Ok((listener, port));
        }
        for candidate in port..=port.saturating_add(24) {
            match TcpListener::bind((host, candidate)).await {
                Ok(listener) => {
                    if candidate != port {
                        info!(requested = port, bound = candidate, "port in use, selected fallback port");
                    }
                    return Ok((listener, candidate));
                }
                Err(e) if candidate == port.saturating_add(24) => return Err(e.into()),
                Err(_) => continue,
            }
        }
        anyhow::bail!("failed to bind any port in range {port}..={}", port.saturating_add(24));
    }

    /// MCP over HTTP (Streamable HTTP transport), mounted at `/mcp` alongside
    /// the stdio face served from `main` (§2/§6: the MCP face is available
    /// over both stdio and HTTP).
    fn create_mcp_service(
        gateway: Arc<GatewayContext>,
    ) -> StreamableHttpService<DiscoveryGatewayServer, LocalSessionManager> {
        let server = DiscoveryGatewayServer::new(gateway.clone());
        let service_factory = move || Ok(server.clone());
        let session_manager = Arc::new(LocalSessionManager::default());
        let config = StreamableHttpServerConfig {
            sse_keep_alive: Some(std::time::Duration::from_secs(15)),
            stateful_mode: true,
            cancellation_token: {
                let token = CancellationToken::new();
                let shutdown = gateway.shutdown.clone();
                let child = token.clone();
                tokio::spawn(async move {
                    shutdown.notified().await;
                    child.cancel();
                });
                token
            },
        };
        StreamableHttpService::new(service_factory, session_manager, config)
    }

    fn build_router(gateway: Arc<GatewayContext>) -> Router {
        let mcp_service = create_mcp_service(gateway.clone());
        Router::new()
            .route("/health", get(health))
            .route("/api/mcp/servers", get(list_servers).post(register_server))
            .route("/api/mcp/servers/{name}", get(get_server).delete(remove_server))
            .route("/api/tools/discover", post(discover_tools))
            .route("/api/tools/provision", post(provision_tools))
            .route("/api/proxy/execute", post(execute_tool))
            .nest_service("/mcp", mcp_service)
            .with_state(gateway)
    }

    #[derive(Serialize)]
    struct HealthResponse {
        status: &'static str,
        uptime_s: u64,
        version: &'static str,
    }

    async fn health(State(gateway): State<Arc<GatewayContext>>) -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "healthy",
            uptime_s: gateway.uptime_secs(),
            version: env!("CARGO_PKG_VERSION"),
        })
    }

    async fn list_servers(State(gateway): State<Arc<GatewayContext>>) -> Json<Vec<crate::backend::ServerStatus>> {
        Json(gateway.proxy.list_servers())
    }

    #[derive(Deserialize)]
    struct RegisterServerBody {
        name: String,
        config: BackendConfig,
    }

    async fn register_server(
        State(gateway): State<Arc<GatewayContext>>,
        Json(body): Json<RegisterServerBody>,
    ) -> Result<(StatusCode, Json<Value>), ApiError> {
        let tool_count = gateway.proxy.register_server(&body.name, body.config).await?;
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({"name": body.name, "tool_count": tool_count})),
        ))
    }

    async fn get_server(
        State(gateway): State<Arc<GatewayContext>>,
        Path(name): Path<String>,
    ) -> Result<Json<crate::backend::ServerStatus>, ApiError> {
        gateway
            .client_manager
            .status(&name)
            .map(Json)
            .ok_or_else(|| ApiError(GatewayError::UnknownTool(name)))
    }

    async fn remove_server(
        State(gateway): State<Arc<GatewayContext>>,
        Path(name): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        gateway.proxy.remove_server(&name).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    #[derive(Deserialize)]
    struct DiscoverBody {
        query: String,
        tags: Option<Vec<String>>,
        context: Option<String>,
        limit: Option<u32>,
    }

    async fn discover_tools(
        State(gateway): State<Arc<GatewayContext>>,
        Json(body): Json<DiscoverBody>,
    ) -> Result<Json<Value>, ApiError> {
        let tools = gateway
            .proxy
            .discover_tools(&body.query, body.tags.as_deref(), body.context.as_deref(), body.limit)?;
        Ok(Json(serde_json::json!({
            "tools": tools,
            "query_id": uuid_like_id(),
            "timestamp": now_epoch(),
        })))
    }

    #[derive(Deserialize)]
    struct ProvisionBody {
        tool_ids: Option<Vec<String>>,
        max_tools: Option<u32>,
        context_tokens: Option<u32>,
    }

    async fn provision_tools(
        State(gateway): State<Arc<GatewayContext>>,
        Json(body): Json<ProvisionBody>,
    ) -> Json<Value> {
        let result = gateway.proxy.provision_tools(
            body.tool_ids.as_deref(),
            body.max_tools,
            body.context_tokens,
        );
        Json(serde_json::json!({"tools": result.tools, "metadata": result.metadata}))
    }

    #[derive(Deserialize)]
    struct ExecuteBody {
        tool_id: String,
        arguments: Option<Value>,
    }

    async fn execute_tool(
        State(gateway): State<Arc<GatewayContext>>,
        Json(body): Json<ExecuteBody>,
    ) -> Result<Json<Value>, ApiError> {
        let result = gateway.proxy.execute_tool(&body.tool_id, body.arguments).await?;
        Ok(Json(serde_json::json!({"result": result.result})))
    }

    fn now_epoch() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn uuid_like_id() -> String {
        format!("{:x}", now_epoch())
    }

    /// Maps [`GatewayError`] onto the HTTP status taxonomy (§7 "User-visible
    /// mapping").
    struct ApiError(GatewayError);

    impl From<GatewayError> for ApiError {
        fn from(e: GatewayError) -> Self {
            ApiError(e)
        }
    }

    impl axum::response::IntoResponse for ApiError {
        fn into_response(self) -> axum::response::Response {
            let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = Json(serde_json::json!({"detail": self.0.to_string(), "code": self.0.code()}));
            (status, body).into_response()
        }
    }

}
