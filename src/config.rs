use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

/// Process-wide gateway settings (§6 "Recognized options", `gateway.*` keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_max_tokens_per_request")]
    pub max_tokens_per_request: u32,

    #[serde(default = "default_max_tools_per_request")]
    pub max_tools_per_request: u32,

    #[serde(default = "default_true")]
    pub config_watch_enabled: bool,

    #[serde(default = "default_health_check_interval_s")]
    pub health_check_interval_s: u64,

    #[serde(default = "default_connection_timeout_s")]
    pub connection_timeout_s: u64,

    #[serde(default)]
    pub require_provisioning: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            log_level: default_log_level(),
            max_tokens_per_request: default_max_tokens_per_request(),
            max_tools_per_request: default_max_tools_per_request(),
            config_watch_enabled: true,
            health_check_interval_s: default_health_check_interval_s(),
            connection_timeout_s: default_connection_timeout_s(),
            require_provisioning: false,
        }
    }
}

/// Per-backend declarative entry (§3 BackendConfig, §6 `backends.<name>.*`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_transport")]
    pub transport: Transport,

    /// Command to spawn (stdio transport).
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Endpoint URL (sse / streamable-http transport).
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub tool_filter: ToolFilter,

    #[serde(default)]
    pub health: BackendHealthConfig,

    #[serde(default)]
    pub options: BackendOptions,
}

/// Tool name allow/deny filter applied after `list_tools` (§4.2 connect).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFilter {
    #[serde(default = "default_filter_mode")]
    pub mode: FilterMode,
    #[serde(default)]
    pub list: Vec<String>,
}

impl Default for ToolFilter {
    fn default() -> Self {
        Self {
            mode: FilterMode::Allow,
            list: Vec::new(),
        }
    }
}

impl ToolFilter {
    /// Apply the filter to a tool name. Matching is case-insensitive and
    /// supports a simple `*` wildcard (glob-style, not regex).
    pub fn allows(&self, tool_name: &str) -> bool {
        if self.list.is_empty() {
            // Empty list means "allow all" regardless of mode (§3 invariant).
            return true;
        }
        let matched = self
            .list
            .iter()
            .any(|pattern| glob_match_case_insensitive(pattern, tool_name));
        match self.mode {
            FilterMode::Allow => matched,
            FilterMode::Deny => !matched,
        }
    }
}

fn glob_match_case_insensitive(pattern: &str, value: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let value = value.to_lowercase();
    if !pattern.contains('*') {
        return pattern == value;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 && !pattern.starts_with('*') {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            if !rest.ends_with(part) {
                return false;
            }
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Per-backend health check overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendHealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub interval_s: Option<u64>,
    pub timeout_s: Option<u64>,
}

impl Default for BackendHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_s: None,
            timeout_s: None,
        }
    }
}

/// Per-backend transport options (§3 `options`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendOptions {
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            timeout_s: default_timeout_s(),
            retry_count: default_retry_count(),
        }
    }
}

/// Transport type for a backend (§2 C3: stdio, sse, streamable-http).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Stdio,
    Sse,
    StreamableHttp,
}

// --- Defaults ---

fn default_port() -> u16 {
    8001
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_tokens_per_request() -> u32 {
    2000
}
fn default_max_tools_per_request() -> u32 {
    10
}
fn default_health_check_interval_s() -> u64 {
    30
}
fn default_connection_timeout_s() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_transport() -> Transport {
    Transport::Stdio
}
fn default_filter_mode() -> FilterMode {
    FilterMode::Allow
}
fn default_timeout_s() -> u64 {
    30
}
fn default_retry_count() -> u32 {
    3
}

// --- Environment variable substitution ---

/// Expand `${VAR}` and `${VAR:-default}` references against the process
/// environment. Unknown variables without a default yield a `ConfigError`
/// (spec §4.7/§6 — "unknown variables yield an error unless a default-form
/// is present").
fn substitute_env_vars(raw: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("valid regex");
    let mut err: Option<String> = None;
    let expanded = re.replace_all(raw, |caps: &regex::Captures| {
        let name = &caps[1];
        let default = caps.get(3).map(|m| m.as_str());
        match std::env::var(name) {
            Ok(val) => val,
            Err(_) => match default {
                Some(d) => d.to_string(),
                None => {
                    err = Some(name.to_string());
                    String::new()
                }
            },
        }
    });
    if let Some(name) = err {
        anyhow::bail!("unknown environment variable '{name}' referenced in config (no default provided)");
    }
    Ok(expanded.into_owned())
}

impl Config {
    /// Load config from a YAML file: read -> substitute env vars -> parse -> validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&raw)
            .with_context(|| format!("failed to load config file: {}", path.display()))
    }

    /// Parse and validate config from an in-memory YAML string (used by the
    /// loader and by hot-reload, which re-reads the file on each change).
    pub fn from_str(raw: &str) -> Result<Self> {
        let expanded =
            substitute_env_vars(raw).context("environment variable substitution failed")?;
        let config: Config =
            serde_yaml_ng::from_str(&expanded).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HOST`/`PORT`/`LOG_LEVEL` env var overrides (§6 "Environment
    /// variables consumed by the core"). Returns whether `PORT` was set
    /// explicitly, which governs the port-binding fallback behavior.
    pub fn apply_env_overrides(&mut self) -> bool {
        let mut port_explicit = false;
        if let Ok(host) = std::env::var("HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.gateway.port = port;
            port_explicit = true;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.gateway.log_level = level;
        }
        port_explicit
    }

    fn validate(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            match backend.transport {
                Transport::Stdio => {
                    if backend.command.is_none() {
                        anyhow::bail!("backend '{name}': stdio transport requires 'command' field");
                    }
                }
                Transport::Sse | Transport::StreamableHttp => {
                    if backend.url.is_none() {
                        anyhow::bail!(
                            "backend '{name}': {:?} transport requires 'url' field",
                            backend.transport
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Diff between the previously-committed backend set and a freshly parsed one
/// (used by the config watcher's reconcile step, §4.7).
pub struct ConfigDiff {
    pub added: Vec<(String, BackendConfig)>,
    pub removed: Vec<String>,
    pub changed: Vec<(String, BackendConfig)>,
}

impl Config {
    pub fn diff_backends(&self, new: &Config) -> ConfigDiff {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut changed = Vec::new();

        for (name, new_config) in &new.backends {
            match self.backends.get(name) {
                None => added.push((name.clone(), new_config.clone())),
                Some(old_config) if old_config != new_config => {
                    changed.push((name.clone(), new_config.clone()));
                }
                _ => {}
            }
        }
        for name in self.backends.keys() {
            if !new.backends.contains_key(name) {
                removed.push(name.clone());
            }
        }

        ConfigDiff {
            added,
            removed,
            changed,
        }
    }
}

pub fn health_check_interval(gateway: &GatewayConfig, backend: &BackendHealthConfig) -> Duration {
    Duration::from_secs(backend.interval_s.unwrap_or(gateway.health_check_interval_s))
}

pub fn health_check_timeout(gateway: &GatewayConfig, backend: &BackendHealthConfig) -> Duration {
    Duration::from_secs(backend.timeout_s.unwrap_or(gateway.connection_timeout_s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
backends:
  test-echo:
    transport: stdio
    command: echo
    args: ["hello"]
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.backends.len(), 1);
        let backend = config.backends.get("test-echo").unwrap();
        assert_eq!(backend.transport, Transport::Stdio);
        assert_eq!(backend.command.as_deref(), Some("echo"));
    }

    #[test]
    fn parses_sse_backend() {
        let yaml = r#"
backends:
  exa:
    transport: sse
    url: "http://localhost:9000/sse"
"#;
        let config = Config::from_str(yaml).unwrap();
        let backend = config.backends.get("exa").unwrap();
        assert_eq!(backend.transport, Transport::Sse);
        assert_eq!(backend.url.as_deref(), Some("http://localhost:9000/sse"));
    }

    #[test]
    fn validate_rejects_stdio_missing_command() {
        let yaml = r#"
backends:
  broken:
    transport: stdio
"#;
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn validate_rejects_http_missing_url() {
        let yaml = r#"
backends:
  broken:
    transport: streamable-http
"#;
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn gateway_defaults_match_spec() {
        let config = Config::from_str("{}").unwrap();
        assert_eq!(config.gateway.port, 8001);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.max_tokens_per_request, 2000);
        assert_eq!(config.gateway.max_tools_per_request, 10);
        assert!(config.gateway.config_watch_enabled);
        assert_eq!(config.gateway.health_check_interval_s, 30);
        assert_eq!(config.gateway.connection_timeout_s, 10);
        assert!(!config.gateway.require_provisioning);
    }

    #[test]
    fn env_var_substitution_with_default() {
        // SAFETY: test runs single-threaded within this process's test harness;
        // no concurrent env reads of this key occur.
        unsafe { std::env::remove_var("GATEWAY_TEST_UNSET_VAR") };
        let yaml = "backends:\n  b:\n    transport: stdio\n    command: \"${GATEWAY_TEST_UNSET_VAR:-fallback}\"\n";
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(
            config.backends.get("b").unwrap().command.as_deref(),
            Some("fallback")
        );
    }

    #[test]
    fn env_var_substitution_unknown_var_errors() {
        unsafe { std::env::remove_var("GATEWAY_TEST_UNSET_VAR_2") };
        let yaml = "backends:\n  b:\n    transport: stdio\n    command: \"${GATEWAY_TEST_UNSET_VAR_2}\"\n";
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn tool_filter_deny_wildcard() {
        let filter = ToolFilter {
            mode: FilterMode::Deny,
            list: vec!["*screenshot*".to_string()],
        };
        assert!(!filter.allows("take_screenshot"));
        assert!(filter.allows("click"));
    }

    #[test]
    fn tool_filter_allow_empty_list_allows_all() {
        let filter = ToolFilter::default();
        assert!(filter.allows("anything"));
    }

    #[test]
    fn tool_filter_allow_list_is_case_insensitive() {
        let filter = ToolFilter {
            mode: FilterMode::Allow,
            list: vec!["Search".to_string()],
        };
        assert!(filter.allows("search"));
        assert!(!filter.allows("other"));
    }

    #[test]
    fn diff_backends_detects_added_removed_changed() {
        let old = Config::from_str(
            r#"
backends:
  exa:
    transport: stdio
    command: npx
    args: ["-y", "exa-server"]
  tavily:
    transport: stdio
    command: npx
    args: ["-y", "tavily-server"]
"#,
        )
        .unwrap();
        let new = Config::from_str(
            r#"
backends:
  exa:
    transport: stdio
    command: npx
    args: ["-y", "exa-server", "--new-flag"]
  firecrawl:
    transport: stdio
    command: npx
    args: ["-y", "firecrawl-server"]
"#,
        )
        .unwrap();

        let diff = old.diff_backends(&new);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].0, "firecrawl");
        assert_eq!(diff.removed, vec!["tavily".to_string()]);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].0, "exa");
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let yaml = "backends:\n  b: [this is not a map]\n";
        assert!(Config::from_str(yaml).is_err());
    }
}
