use thiserror::Error;

/// Taxonomy of errors surfaced by the gateway's public operations.
///
/// Each variant maps to an HTTP status at the gateway surface; see
/// [`GatewayError::status_code`].
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration is missing, malformed, or fails validation.
    #[error("config error: {0}")]
    Config(String),

    /// A transport-level failure talking to a backend (spawn failure,
    /// connection refused, stream closed unexpectedly).
    #[error("transport error for backend '{backend}': {message}")]
    Transport { backend: String, message: String },

    /// The backend responded, but the response violated the MCP protocol
    /// (malformed JSON-RPC, unexpected message shape).
    #[error("protocol error from backend '{backend}': {message}")]
    Protocol { backend: String, message: String },

    /// An operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An in-flight operation was cancelled (e.g. by shutdown or caller
    /// disconnect) before it could complete.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The backend tool itself reported a failure (not a transport issue).
    #[error("tool '{tool}' on backend '{backend}' failed: {message}")]
    Tool {
        backend: String,
        tool: String,
        message: String,
    },

    /// The referenced tool id is not present in the registry.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// The referenced backend has no live session.
    #[error("backend '{0}' is not connected")]
    NotConnected(String),

    /// A tool was called without having gone through provisioning first,
    /// while `gateway.require_provisioning` is enabled.
    #[error("tool '{0}' has not been provisioned")]
    NotProvisioned(String),

    /// A discovery or provisioning request could not be satisfied within
    /// the caller's token/tool budget.
    #[error("request would exceed budget: {0}")]
    BudgetExceeded(String),
}

impl GatewayError {
    /// HTTP status code this error maps to at the HTTP/MCP gateway surface.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Config(_) => 400,
            GatewayError::UnknownTool(_) => 400,
            GatewayError::NotConnected(_) => 503,
            GatewayError::NotProvisioned(_) => 400,
            GatewayError::BudgetExceeded(_) => 400,
            GatewayError::Timeout(_) => 504,
            GatewayError::Cancelled(_) => 499,
            GatewayError::Transport { .. } => 502,
            GatewayError::Protocol { .. } => 502,
            GatewayError::Tool { .. } => 502,
        }
    }

    /// Short machine-readable error code, used in HTTP/MCP error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config_error",
            GatewayError::Transport { .. } => "transport_error",
            GatewayError::Protocol { .. } => "protocol_error",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Cancelled(_) => "cancelled",
            GatewayError::Tool { .. } => "tool_error",
            GatewayError::UnknownTool(_) => "unknown_tool",
            GatewayError::NotConnected(_) => "not_connected",
            GatewayError::NotProvisioned(_) => "not_provisioned",
            GatewayError::BudgetExceeded(_) => "budget_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(GatewayError::UnknownTool("t".into()).status_code(), 400);
        assert_eq!(GatewayError::NotConnected("b".into()).status_code(), 503);
        assert_eq!(
            GatewayError::BudgetExceeded("too many tools".into()).status_code(),
            400
        );
        assert_eq!(GatewayError::NotProvisioned("t".into()).status_code(), 400);
        assert_eq!(
            GatewayError::Tool {
                backend: "b".into(),
                tool: "t".into(),
                message: "boom".into()
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn messages_include_context() {
        let err = GatewayError::Transport {
            backend: "weather".into(),
            message: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("weather"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn codes_are_stable_identifiers() {
        assert_eq!(GatewayError::Config("x".into()).code(), "config_error");
        assert_eq!(
            GatewayError::NotProvisioned("t".into()).code(),
            "not_provisioned"
        );
    }
}
