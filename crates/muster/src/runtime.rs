//! Wiring of stores, tools, orchestrator and workflow engine from config.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use muster_config::LoadedConfig;
use muster_events::{EventEmitter, TracingSink};
use muster_mcp::McpAggregator;
use muster_orchestrator::{Orchestrator, OrchestratorSettings};
use muster_store::{OpenedStore, open_store};
use muster_workflow::{EngineConfig, WorkflowEngine};
use tracing::{info, warn};

use crate::core_tools;

/// Everything a command needs to act on definitions, instances and workflows.
pub struct Runtime {
    pub store: OpenedStore,
    pub tools: Arc<McpAggregator>,
    pub orchestrator: Orchestrator,
    pub engine: WorkflowEngine,
}

impl Runtime {
    /// Open the configured store and build the services on top of it.
    ///
    /// MCP servers are configured but not connected; see [`Runtime::connect`].
    pub fn open(loaded: &LoadedConfig) -> Result<Self> {
        let config = &loaded.config;
        let store = open_store(&config.store(), &loaded.config_dir).context("failed to open definition store")?;

        let tools = Arc::new(McpAggregator::with_servers(config.mcp_servers()));
        core_tools::register(&tools, store.definitions.clone());

        let events = EventEmitter::new(Arc::new(TracingSink));
        let orchestrator = Orchestrator::new(
            store.definitions.clone(),
            tools.clone(),
            events.clone(),
            OrchestratorSettings::from(&config.orchestrator()),
        );
        let engine = WorkflowEngine::new(store.definitions.clone(), store.executions.clone(), tools.clone(), events)
            .with_config(EngineConfig::from(&config.workflow()));

        Ok(Self {
            store,
            tools,
            orchestrator,
            engine,
        })
    }

    /// Connect every configured MCP server and publish class availability.
    pub async fn connect(&self) {
        let configured = self.tools.server_status().len();
        let connected = self.tools.connect_all().await;
        if connected < configured {
            for status in self.tools.server_status().into_iter().filter(|s| !s.connected) {
                warn!(
                    server = %status.name,
                    error = status.last_error.as_deref().unwrap_or("unknown"),
                    "MCP server not connected"
                );
            }
        }
        info!(connected, configured, tools = self.tools.tool_names().len(), "Tools ready");
        self.orchestrator.refresh_availability().await;
    }

    /// Stop MCP server processes.
    pub async fn close(&self) {
        self.orchestrator.shutdown();
        self.tools.shutdown().await;
    }
}
