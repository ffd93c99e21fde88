//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [store]                  # definition store backend
//! [mcp]                    # tool servers
//! [[mcp.servers]]
//! [orchestrator]           # lifecycle defaults
//! [workflow]               # workflow engine settings
//! [logging]
//! [[instances]]            # instances started by `muster serve`
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusterConfig {
    pub store: Option<StoreConfig>,
    pub mcp: Option<McpConfig>,
    pub orchestrator: Option<OrchestratorConfig>,
    pub workflow: Option<WorkflowConfig>,
    pub logging: Option<LoggingConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceEntry>,
}

impl MusterConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not merged field by field.
    pub fn merge(&mut self, other: MusterConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.mcp.is_some() {
            self.mcp = other.mcp;
        }
        if other.orchestrator.is_some() {
            self.orchestrator = other.orchestrator;
        }
        if other.workflow.is_some() {
            self.workflow = other.workflow;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        if !other.instances.is_empty() {
            self.instances = other.instances;
        }
    }

    /// Store section, or its defaults.
    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    /// Orchestrator section, or its defaults.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        self.orchestrator.clone().unwrap_or_default()
    }

    /// Workflow section, or its defaults.
    pub fn workflow(&self) -> WorkflowConfig {
        self.workflow.clone().unwrap_or_default()
    }

    /// Logging section, or its defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Enabled MCP servers.
    pub fn mcp_servers(&self) -> Vec<McpServerEntry> {
        match self.mcp {
            Some(ref mcp) if mcp.enabled => mcp.servers.iter().filter(|s| s.enabled).cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Reject settings that parse but cannot work: nameless or duplicate MCP
    /// servers, servers without a command or url, and duplicate instances.
    pub fn validate(&self) -> crate::Result<()> {
        let mut servers = HashSet::new();
        for server in self.mcp.iter().flat_map(|m| &m.servers) {
            if server.name.trim().is_empty() {
                return Err(ConfigError::invalid("mcp.servers", "server name cannot be empty"));
            }
            if !servers.insert(server.name.as_str()) {
                return Err(ConfigError::invalid(
                    "mcp.servers",
                    format!("server '{}' is declared twice", server.name),
                ));
            }
            let missing = match server.transport {
                McpTransportType::Stdio if server.command.trim().is_empty() => Some("command"),
                McpTransportType::Http if server.url.as_deref().map_or(true, |u| u.trim().is_empty()) => Some("url"),
                _ => None,
            };
            if let Some(field) = missing {
                return Err(ConfigError::invalid(
                    "mcp.servers",
                    format!("server '{}' has no {}", server.name, field),
                ));
            }
        }

        let mut instances = HashSet::new();
        for instance in &self.instances {
            if instance.name.trim().is_empty() || instance.class.trim().is_empty() {
                return Err(ConfigError::invalid("instances", "every instance needs a name and a class"));
            }
            if !instances.insert((instance.scope.as_deref(), instance.name.as_str())) {
                return Err(ConfigError::invalid(
                    "instances",
                    format!("instance '{}' is declared twice", instance.name),
                ));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Which definition store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Probe the file backend and fall back to memory.
    #[default]
    Auto,
    File,
    Memory,
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory holding definition documents. Defaults to `<config dir>/definitions`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definitions_dir: Option<PathBuf>,
    /// Watch the definitions directory for changes.
    pub watch: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Auto,
            definitions_dir: None,
            watch: true,
        }
    }
}

impl StoreConfig {
    /// The definitions directory, relative to `config_dir` unless configured.
    pub fn definitions_dir_in(&self, config_dir: &Path) -> PathBuf {
        match self.definitions_dir {
            Some(ref dir) if dir.is_absolute() => dir.clone(),
            Some(ref dir) => config_dir.join(dir),
            None => config_dir.join("definitions"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────────────────────────────────────

/// MCP server configuration section.
///
/// ```toml
/// [[mcp.servers]]
/// name = "kubernetes"
/// command = "mcp-kubernetes"
/// args = ["--read-only"]
/// env = [["KUBECONFIG", "/home/user/.kube/config"]]
///
/// [[mcp.servers]]
/// name = "remote"
/// transport = "http"
/// url = "http://localhost:8090/mcp"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Whether MCP is enabled globally.
    pub enabled: bool,
    pub servers: Vec<McpServerEntry>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            servers: Vec::new(),
        }
    }
}

/// Transport type for MCP server connections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportType {
    /// Spawns a child process and talks over stdin/stdout.
    #[default]
    Stdio,
    /// Posts JSON-RPC requests to a URL.
    Http,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerEntry {
    pub name: String,
    #[serde(default)]
    pub transport: McpTransportType,
    /// Command to execute (stdio).
    #[serde(default)]
    pub command: String,
    /// Server URL (http).
    pub url: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables as `[key, value]` pairs (stdio).
    #[serde(default)]
    pub env: Vec<[String; 2]>,
    /// HTTP headers as `[key, value]` pairs (http).
    #[serde(default)]
    pub headers: Vec<[String; 2]>,
    /// Request timeout in seconds. Defaults to 30.
    pub timeout_secs: Option<u64>,
    /// Number of retries (http). Defaults to 3.
    pub retries: Option<u32>,
    /// Prefix for exposed tool names; defaults to the server name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prefix: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl McpServerEntry {
    /// A stdio server entry.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransportType::Stdio,
            command: command.into(),
            url: None,
            args: Vec::new(),
            env: Vec::new(),
            headers: Vec::new(),
            timeout_secs: None,
            retries: None,
            tool_prefix: None,
            enabled: true,
        }
    }

    /// An HTTP server entry.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: McpTransportType::Http,
            command: String::new(),
            url: Some(url.into()),
            ..Self::new(name, "")
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push([key.into(), value.into()]);
        self
    }

    pub fn with_tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    pub fn is_http(&self) -> bool {
        matches!(self.transport, McpTransportType::Http)
    }

    /// Environment variables as tuples.
    pub fn env_tuples(&self) -> Vec<(String, String)> {
        self.env.iter().map(|[k, v]| (k.clone(), v.clone())).collect()
    }

    /// HTTP headers as tuples.
    pub fn header_tuples(&self) -> Vec<(String, String)> {
        self.headers.iter().map(|[k, v]| (k.clone(), v.clone())).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// `[orchestrator]` section: defaults applied when a service class leaves a
/// policy field unset, plus backoff and recovery tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub health_interval_secs: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub create_timeout_secs: u64,
    pub delete_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Largest exponent used in the backoff formula.
    pub backoff_cap: u32,
    pub recovery_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 30,
            failure_threshold: 3,
            success_threshold: 1,
            create_timeout_secs: 60,
            delete_timeout_secs: 60,
            health_check_timeout_secs: 10,
            backoff_base_secs: 30,
            backoff_max_secs: 1800,
            backoff_cap: 6,
            recovery_interval_secs: 15,
        }
    }
}

impl OrchestratorConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow, logging, instances
// ─────────────────────────────────────────────────────────────────────────────

/// `[workflow]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Write the in-progress execution record after every step.
    pub persist_incremental: bool,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"muster=debug"`.
    pub level: String,
    /// Also write JSON logs to daily rolling files.
    pub file: bool,
    /// Log directory. Defaults to `<config dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
            dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn dir_in(&self, config_dir: &Path) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| config_dir.join("logs"))
    }
}

/// A service instance declared in config and started by `muster serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub name: String,
    /// Service class name.
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
