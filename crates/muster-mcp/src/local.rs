//! Tools implemented inside the process.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use muster_types::{ToolError, ToolResult};
use serde_json::Value;

/// A tool served in-process rather than by an MCP server.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Exposed name. By convention `core_<name>`.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn call(&self, arguments: Value) -> Result<ToolResult, ToolError>;
}

type BoxedCall = dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolResult, ToolError>> + Send>> + Send + Sync;

/// A [`LocalTool`] backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    call: Box<BoxedCall>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            call: Box::new(move |args| Box::pin(f(args))),
        }
    }
}

#[async_trait]
impl LocalTool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        (self.call)(arguments).await
    }
}
