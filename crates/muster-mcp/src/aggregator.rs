//! Tool aggregator: one [`ToolInvoker`] over many MCP servers and in-process tools.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use muster_config::McpServerEntry;
use muster_types::{ToolError, ToolInvoker, ToolResult};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::McpClient;
use crate::error::{McpError, Result};
use crate::local::LocalTool;
use crate::naming::exposed_tool_name;
use crate::protocol::ToolInfo;

/// A configured server and its live client, if connected.
struct ServerSlot {
    entry: McpServerEntry,
    client: Option<Arc<McpClient>>,
    tools: Vec<ToolInfo>,
    last_error: Option<String>,
}

impl ServerSlot {
    fn prefix(&self) -> &str {
        self.entry.tool_prefix.as_deref().unwrap_or(&self.entry.name)
    }
}

/// Where an exposed tool name is served.
#[derive(Debug, Clone)]
struct Route {
    server: String,
    tool: String,
}

/// Connection summary for one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub connected: bool,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Aggregates tools from MCP servers and local tools under one name space.
///
/// External tools are exposed as `x_<prefix>_<tool>`; local tools keep their
/// own names. The set of resolvable names is published as an immutable
/// snapshot that readers clone without holding a lock across awaits.
pub struct McpAggregator {
    servers: RwLock<BTreeMap<String, ServerSlot>>,
    routes: RwLock<HashMap<String, Route>>,
    local: RwLock<BTreeMap<String, Arc<dyn LocalTool>>>,
    available: RwLock<Arc<HashSet<String>>>,
    changes: watch::Sender<u64>,
}

impl Default for McpAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl McpAggregator {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(BTreeMap::new()),
            routes: RwLock::new(HashMap::new()),
            local: RwLock::new(BTreeMap::new()),
            available: RwLock::new(Arc::new(HashSet::new())),
            changes: watch::channel(0).0,
        }
    }

    /// An aggregator with these servers configured but not yet connected.
    pub fn with_servers(entries: impl IntoIterator<Item = McpServerEntry>) -> Self {
        let aggregator = Self::new();
        for entry in entries {
            aggregator.add_server(entry);
        }
        aggregator
    }

    /// Configure a server. Replaces any server with the same name.
    pub fn add_server(&self, entry: McpServerEntry) {
        tracing::debug!(server = %entry.name, "adding MCP server configuration");
        self.servers.write().insert(
            entry.name.clone(),
            ServerSlot {
                entry,
                client: None,
                tools: Vec::new(),
                last_error: None,
            },
        );
    }

    /// Register an in-process tool.
    pub fn register_local(&self, tool: Arc<dyn LocalTool>) {
        tracing::debug!(tool = %tool.name(), "registering local tool");
        self.local.write().insert(tool.name().to_string(), tool);
        self.rebuild();
    }

    /// Receiver bumped whenever the set of available tool names changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Connect every configured server that is not connected yet.
    ///
    /// Failures are logged and recorded per server; returns how many servers
    /// are connected afterwards.
    pub async fn connect_all(&self) -> usize {
        let pending: Vec<McpServerEntry> = self
            .servers
            .read()
            .values()
            .filter(|s| s.client.is_none())
            .map(|s| s.entry.clone())
            .collect();

        for entry in pending {
            let name = entry.name.clone();
            let outcome = tokio::task::spawn_blocking(move || connect_and_list(&entry))
                .await
                .unwrap_or_else(|e| Err(McpError::launch(format!("connect task failed: {}", e))));

            let mut servers = self.servers.write();
            let Some(slot) = servers.get_mut(&name) else { continue };
            match outcome {
                Ok((client, tools)) => {
                    tracing::info!(server = %name, tool_count = tools.len(), "MCP server connected");
                    slot.client = Some(Arc::new(client));
                    slot.tools = tools;
                    slot.last_error = None;
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to connect MCP server");
                    slot.last_error = Some(e.to_string());
                }
            }
        }

        self.rebuild();
        self.connected_count()
    }

    /// Re-list tools on connected servers and retry disconnected ones.
    pub async fn refresh(&self) -> usize {
        let connected: Vec<(String, Arc<McpClient>)> = self
            .servers
            .read()
            .iter()
            .filter_map(|(name, s)| s.client.clone().map(|c| (name.clone(), c)))
            .collect();

        for (name, client) in connected {
            let outcome = tokio::task::spawn_blocking(move || {
                if client.is_connected() {
                    client.list_tools()
                } else {
                    Err(McpError::Closed)
                }
            })
            .await
            .unwrap_or_else(|e| Err(McpError::transport(format!("refresh task failed: {}", e))));

            match outcome {
                Ok(tools) => {
                    if let Some(slot) = self.servers.write().get_mut(&name) {
                        slot.tools = tools;
                    }
                }
                Err(e) => self.disconnect(&name, &e),
            }
        }

        self.connect_all().await
    }

    /// Refresh on an interval until cancelled.
    pub async fn run_refresh(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let connected = self.refresh().await;
                    tracing::debug!(connected, "refreshed MCP tools");
                }
            }
        }
    }

    /// Drop a server's client and its tools after a connectivity failure.
    fn disconnect(&self, name: &str, error: &McpError) {
        let client = {
            let mut servers = self.servers.write();
            let Some(slot) = servers.get_mut(name) else { return };
            slot.tools.clear();
            slot.last_error = Some(error.to_string());
            slot.client.take()
        };
        if client.is_some() {
            tracing::warn!(server = %name, error = %error, "MCP server disconnected");
            self.rebuild();
        }
        // Kill the child off the async thread; a blocked read may hold the lock.
        if let Some(client) = client {
            tokio::task::spawn_blocking(move || {
                client.shutdown();
            });
        }
    }

    /// Stop every connected server.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<McpClient>> = self
            .servers
            .write()
            .values_mut()
            .filter_map(|s| {
                s.tools.clear();
                s.client.take()
            })
            .collect();
        self.rebuild();

        let _ = tokio::task::spawn_blocking(move || {
            for client in clients {
                client.shutdown();
            }
        })
        .await;
    }

    pub fn connected_count(&self) -> usize {
        self.servers.read().values().filter(|s| s.client.is_some()).count()
    }

    pub fn server_status(&self) -> Vec<ServerStatus> {
        self.servers
            .read()
            .values()
            .map(|s| ServerStatus {
                name: s.entry.name.clone(),
                connected: s.client.is_some(),
                tool_count: s.tools.len(),
                last_error: s.last_error.clone(),
            })
            .collect()
    }

    /// Every exposed tool name, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.available.read().iter().cloned().collect();
        names.sort();
        names
    }

    /// Recompute routes and the published name snapshot.
    fn rebuild(&self) {
        let mut routes = HashMap::new();
        for (server, slot) in self.servers.read().iter() {
            if slot.client.is_none() {
                continue;
            }
            for tool in &slot.tools {
                let exposed = exposed_tool_name(slot.prefix(), &tool.name);
                if let Some(prev) = routes.insert(
                    exposed.clone(),
                    Route {
                        server: server.clone(),
                        tool: tool.name.clone(),
                    },
                ) {
                    tracing::warn!(tool = %exposed, first = %prev.server, second = %server, "duplicate tool name, last server wins");
                }
            }
        }

        let mut names: HashSet<String> = routes.keys().cloned().collect();
        names.extend(self.local.read().keys().cloned());

        *self.routes.write() = routes;
        let changed = {
            let mut available = self.available.write();
            let changed = **available != names;
            *available = Arc::new(names);
            changed
        };
        if changed {
            self.changes.send_modify(|generation| *generation += 1);
        }
    }
}

fn connect_and_list(entry: &McpServerEntry) -> Result<(McpClient, Vec<ToolInfo>)> {
    let mut client = McpClient::connect(entry)?;
    client.initialize()?;
    let tools = client.list_tools()?;
    Ok((client, tools))
}

#[async_trait]
impl ToolInvoker for McpAggregator {
    async fn execute(&self, name: &str, args: Value) -> std::result::Result<ToolResult, ToolError> {
        let local = self.local.read().get(name).cloned();
        if let Some(tool) = local {
            return tool.call(args).await;
        }

        let route = self
            .routes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let client = self
            .servers
            .read()
            .get(&route.server)
            .and_then(|s| s.client.clone())
            .ok_or_else(|| ToolError::Unreachable {
                tool: name.to_string(),
                message: format!("server '{}' is not connected", route.server),
            })?;

        let tool = route.tool.clone();
        let outcome = tokio::task::spawn_blocking(move || client.call_tool(&tool, Some(args)))
            .await
            .map_err(|e| ToolError::Failed {
                tool: name.to_string(),
                message: format!("call task failed: {}", e),
            })?;

        match outcome {
            Ok(result) => Ok(result.into_tool_result()),
            Err(e) => {
                if e.is_connectivity() {
                    self.disconnect(&route.server, &e);
                }
                Err(e.into_tool_error(name))
            }
        }
    }

    fn available_tool_names(&self) -> Arc<HashSet<String>> {
        self.available.read().clone()
    }
}
