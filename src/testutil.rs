//! Test utilities — a controllable mock [`Session`] implementation that lets
//! integration tests exercise the Client Manager and Proxy Service without a
//! real child process or network connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{Session, ToolDescriptor};
use crate::client_manager::ClientManager;
use crate::error::GatewayError;
use crate::registry::ToolRegistry;

/// A mock backend session with a fixed tool list: `echo_tool` (returns
/// arguments verbatim), `slow_tool` (sleeps `call_delay`), and `error_tool`
/// (always fails).
pub struct MockSession {
    name: String,
    call_delay: Duration,
    inject_error: AtomicBool,
    closed: AtomicBool,
    call_log: Mutex<Vec<(String, Option<Value>)>>,
}

impl MockSession {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_delay(name, Duration::ZERO)
    }

    pub fn with_delay(name: &str, call_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            call_delay,
            inject_error: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            call_log: Mutex::new(Vec::new()),
        })
    }

    pub fn set_inject_error(&self, inject: bool) {
        self.inject_error.store(inject, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn call_log(&self) -> Vec<(String, Option<Value>)> {
        self.call_log.lock().await.clone()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        Ok(vec![
            ToolDescriptor {
                name: "echo_tool".to_string(),
                description: "returns arguments as JSON".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "slow_tool".to_string(),
                description: "sleeps call_delay then returns".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "error_tool".to_string(),
                description: "always returns an error".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, GatewayError> {
        self.call_log.lock().await.push((name.to_string(), arguments.clone()));

        if self.call_delay > Duration::ZERO {
            tokio::time::sleep(self.call_delay).await;
        }
        if self.inject_error.load(Ordering::SeqCst) || name == "error_tool" {
            return Err(GatewayError::Tool {
                backend: self.name.clone(),
                tool: name.to_string(),
                message: "mock error injected".to_string(),
            });
        }
        Ok(arguments.unwrap_or(Value::Null))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        if self.inject_error.load(Ordering::SeqCst) {
            Err(GatewayError::NotConnected(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

/// Wire a mock session directly into a [`ClientManager`], bypassing the
/// real stdio/sse/streamable-http transports (§4.2 `connect`, test-only
/// seam).
pub async fn insert_mock(manager: &Arc<ClientManager>, registry: &Arc<ToolRegistry>, mock: &Arc<MockSession>) -> usize {
    manager
        .insert_session_for_test(&mock.name, Arc::clone(mock) as Arc<dyn Session>, registry)
        .await
        .expect("mock session should connect")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_tool_returns_arguments_verbatim() {
        let session = MockSession::new("mock");
        let args = serde_json::json!({"x": 1});
        let result = session.call_tool("echo_tool", Some(args.clone())).await.unwrap();
        assert_eq!(result, args);
    }

    #[tokio::test]
    async fn error_tool_always_fails() {
        let session = MockSession::new("mock");
        assert!(session.call_tool("error_tool", None).await.is_err());
    }

    #[tokio::test]
    async fn close_marks_session_closed() {
        let session = MockSession::new("mock");
        session.close().await.unwrap();
        assert!(session.is_closed());
    }
}
