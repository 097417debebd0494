//! End-to-end tests: exercise the gateway as an MCP server (front door)
//! using an in-process rmcp client connected via `tokio::io::duplex`,
//! backed by mock sessions instead of real child processes.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rmcp::ServiceExt;
    use rmcp::model::CallToolRequestParams;

    use crate::client_manager::ClientManager;
    use crate::discovery::DiscoveryService;
    use crate::embeddings::HashEncoder;
    use crate::gateway::GatewayContext;
    use crate::gating::GatingService;
    use crate::mcp_server::DiscoveryGatewayServer;
    use crate::proxy::ProxyService;
    use crate::registry::ToolRegistry;
    use crate::testutil::{MockSession, insert_mock};

    /// Build a `GatewayContext` with two mock backends already connected,
    /// then wrap it in a duplex-connected MCP client/server pair.
    async fn setup() -> (rmcp::service::Peer<rmcp::RoleClient>, Arc<GatewayContext>) {
        let registry = ToolRegistry::new();
        let manager = ClientManager::new();
        let encoder = Arc::new(HashEncoder::default());
        let discovery = DiscoveryService::new(Arc::clone(&registry), encoder);
        let gating = GatingService::new(50, 100_000);
        let proxy = Arc::new(ProxyService::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            discovery,
            gating,
            false,
        ));

        let mock_a = MockSession::new("alpha");
        let mock_b = MockSession::new("bravo");
        insert_mock(&manager, &registry, &mock_a).await;
        insert_mock(&manager, &registry, &mock_b).await;

        let gateway = Arc::new(GatewayContext {
            registry,
            client_manager: manager,
            proxy,
            shutdown: Arc::new(tokio::sync::Notify::new()),
            started_at: tokio::time::Instant::now(),
        });

        let server = DiscoveryGatewayServer::new(Arc::clone(&gateway));

        let (client_io, server_io) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (client_read, client_write) = tokio::io::split(client_io);

        tokio::spawn(async move {
            match server.serve((server_read, server_write)).await {
                Ok(service) => {
                    let _ = service.waiting().await;
                }
                Err(e) => eprintln!("test server error: {e}"),
            }
        });

        let client_service = ().serve((client_read, client_write)).await.expect("handshake failed");
        let peer = client_service.peer().clone();
        tokio::spawn(async move {
            let _ = client_service.waiting().await;
        });

        (peer, gateway)
    }

    fn call_args(json: serde_json::Value) -> Option<rmcp::model::JsonObject> {
        json.as_object().cloned()
    }

    fn request(name: &str, arguments: Option<rmcp::model::JsonObject>) -> CallToolRequestParams {
        CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments,
            task: None,
        }
    }

    #[tokio::test]
    async fn initialize_handshake_advertises_tools_capability() {
        let (_peer, gateway) = setup().await;
        assert_eq!(gateway.registry.tool_count(), 6);
    }

    #[tokio::test]
    async fn tool_list_exposes_exactly_the_six_gateway_operations() {
        let (peer, _gateway) = setup().await;
        let tools = peer.list_all_tools().await.unwrap();
        let names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
        for expected in [
            "discover_tools",
            "provision_tools",
            "execute_tool",
            "register_mcp_server",
            "list_mcp_servers",
            "remove_mcp_server",
        ] {
            assert!(names.contains(&expected.to_string()), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn discover_tools_ranks_top_result_above_threshold() {
        let (peer, _gateway) = setup().await;
        let result = peer
            .call_tool(request(
                "discover_tools",
                call_args(serde_json::json!({"query": "returns arguments as JSON", "limit": 3})),
            ))
            .await
            .unwrap();
        assert!(!result.content.is_empty());
    }

    #[tokio::test]
    async fn execute_tool_on_unknown_id_returns_tool_error_not_panic() {
        let (peer, _gateway) = setup().await;
        let result = peer
            .call_tool(request(
                "execute_tool",
                call_args(serde_json::json!({"tool_id": "nonexistent_tool"})),
            ))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn execute_tool_proxies_to_owning_backend() {
        let (peer, _gateway) = setup().await;
        let result = peer
            .call_tool(request(
                "execute_tool",
                call_args(serde_json::json!({
                    "tool_id": "alpha_echo_tool",
                    "arguments": {"x": 1}
                })),
            ))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn list_mcp_servers_reports_both_connected_backends() {
        let (peer, _gateway) = setup().await;
        let result = peer.call_tool(request("list_mcp_servers", None)).await.unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn remove_mcp_server_drops_its_tools_from_discovery() {
        let (peer, gateway) = setup().await;
        assert_eq!(gateway.registry.by_server("bravo").len(), 3);

        let result = peer
            .call_tool(request("remove_mcp_server", call_args(serde_json::json!({"name": "bravo"}))))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        assert_eq!(gateway.registry.by_server("bravo").len(), 0);
    }

    /// Removing a backend drops its tools from the registry entirely, so a
    /// subsequent `execute_tool` call is rejected before ever reaching the
    /// (now-absent) session.
    #[tokio::test]
    async fn execute_tool_after_backend_removed_is_rejected() {
        let registry = ToolRegistry::new();
        let manager = ClientManager::new();
        let encoder = Arc::new(HashEncoder::default());
        let discovery = DiscoveryService::new(Arc::clone(&registry), encoder);
        let gating = GatingService::new(50, 100_000);
        let proxy = ProxyService::new(Arc::clone(&registry), Arc::clone(&manager), discovery, gating, false);

        let mock = MockSession::new("solo");
        insert_mock(&manager, &registry, &mock).await;
        manager.remove_backend("solo", &registry).await.unwrap();

        // Tool is gone from the registry entirely once its backend is removed.
        let err = proxy.execute_tool("solo_echo_tool", None).await.unwrap_err();
        assert!(matches!(err, crate::error::GatewayError::UnknownTool(_)));
    }

    /// Budgeted provisioning never exceeds either ceiling (§8 property 2).
    #[tokio::test]
    async fn provision_tools_respects_token_budget() {
        let (peer, _gateway) = setup().await;
        let result = peer
            .call_tool(request(
                "provision_tools",
                call_args(serde_json::json!({"max_tools": 2, "context_tokens": 1})),
            ))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    /// Round-trip law: register then remove leaves the registry as it was.
    #[tokio::test]
    async fn register_then_remove_restores_empty_registry() {
        let registry = ToolRegistry::new();
        let manager = ClientManager::new();
        let mock = MockSession::new("roundtrip");
        insert_mock(&manager, &registry, &mock).await;
        assert_eq!(registry.tool_count(), 3);
        manager.remove_backend("roundtrip", &registry).await.unwrap();
        assert_eq!(registry.tool_count(), 0);
    }

    #[tokio::test]
    async fn slow_tool_call_does_not_block_a_concurrent_call_to_another_backend() {
        let registry = ToolRegistry::new();
        let manager = ClientManager::new();
        let slow = MockSession::with_delay("slow-backend", Duration::from_millis(200));
        let fast = MockSession::new("fast-backend");
        insert_mock(&manager, &registry, &slow).await;
        insert_mock(&manager, &registry, &fast).await;

        let start = tokio::time::Instant::now();
        let (slow_result, fast_result) = tokio::join!(
            manager.call("slow-backend", "echo_tool", None),
            manager.call("fast-backend", "echo_tool", None),
        );
        slow_result.unwrap();
        fast_result.unwrap();
        assert!(start.elapsed() < Duration::from_millis(400), "calls should overlap, not serialize");
    }
}
