//! The tool invocation boundary.
//!
//! The orchestrator and the workflow engine never know the shape of a tool;
//! they dispatch by name through a [`ToolInvoker`] and read back a
//! [`ToolResult`].
//!
//! ```rust,ignore
//! let result = invoker.execute("x_create", json!({"name": "demo"})).await?;
//! if result.is_success() {
//!     println!("{}", result.content);
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tools with this prefix are provided in-process and always count as available.
pub const CORE_TOOL_PREFIX: &str = "core_";

/// Whether `name` is a reserved, always-available tool.
pub fn is_core_tool(name: &str) -> bool {
    name.starts_with(CORE_TOOL_PREFIX)
}

/// Structured result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool reported failure.
    #[serde(default)]
    pub is_error: bool,
    /// Result payload.
    pub content: Value,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(content: impl Into<Value>) -> Self {
        Self {
            is_error: false,
            content: content.into(),
        }
    }

    /// A tool-reported failure.
    pub fn error(content: impl Into<Value>) -> Self {
        Self {
            is_error: true,
            content: content.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.is_error
    }

    /// Human-readable rendering of the content, used for error messages.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("text").or_else(|| map.get("error")) {
                Some(Value::String(s)) => s.clone(),
                _ => self.content.to_string(),
            },
            other => other.to_string(),
        }
    }
}

/// Failure to obtain a result from a tool at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// The backing server could not be reached.
    #[error("tool '{tool}' unreachable: {message}")]
    Unreachable { tool: String, message: String },

    /// The call was dispatched but failed.
    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    /// Whether this error says something about infrastructure reachability
    /// rather than about the call itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unreachable { .. })
    }
}

/// Executes named tools and reports which names currently exist.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Execute `name` with resolved `args`.
    async fn execute(&self, name: &str, args: Value) -> Result<ToolResult, ToolError>;

    /// Snapshot of the tool names currently resolvable.
    fn available_tool_names(&self) -> Arc<HashSet<String>>;

    /// Whether `name` is resolvable right now; core tools always are.
    fn is_available(&self, name: &str) -> bool {
        is_core_tool(name) || self.available_tool_names().contains(name)
    }
}
