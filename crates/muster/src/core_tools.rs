//! In-process `core_` tools: definition queries usable from workflow steps
//! and lifecycle tools without an MCP server.

use std::sync::Arc;

use muster_mcp::{FnTool, McpAggregator};
use muster_types::{DEFAULT_SCOPE, DefinitionStore, DefinitionStoreExt, ToolError, ToolResult};
use serde_json::{Value, json};

pub const SERVICECLASS_LIST: &str = "core_serviceclass_list";
pub const WORKFLOW_LIST: &str = "core_workflow_list";

/// Register the core tools on `tools`.
pub fn register(tools: &McpAggregator, store: Arc<dyn DefinitionStore>) {
    let classes = store.clone();
    tools.register_local(Arc::new(FnTool::new(
        SERVICECLASS_LIST,
        "List service class names in a scope",
        move |args| {
            let store = classes.clone();
            async move {
                let scope = scope_arg(&args);
                let names: Vec<String> = store
                    .list_service_classes(&scope)
                    .await
                    .map_err(|e| failed(SERVICECLASS_LIST, e))?
                    .into_iter()
                    .map(|c| c.name)
                    .collect();
                Ok(ToolResult::ok(json!({ "scope": scope, "serviceClasses": names })))
            }
        },
    )));

    tools.register_local(Arc::new(FnTool::new(
        WORKFLOW_LIST,
        "List workflow names in a scope",
        move |args| {
            let store = store.clone();
            async move {
                let scope = scope_arg(&args);
                let names: Vec<String> = store
                    .list_workflows(&scope)
                    .await
                    .map_err(|e| failed(WORKFLOW_LIST, e))?
                    .into_iter()
                    .map(|w| w.name)
                    .collect();
                Ok(ToolResult::ok(json!({ "scope": scope, "workflows": names })))
            }
        },
    )));
}

fn scope_arg(args: &Value) -> String {
    args.get("scope")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SCOPE)
        .to_string()
}

fn failed(tool: &str, error: impl ToString) -> ToolError {
    ToolError::Failed {
        tool: tool.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_store::MemoryStore;
    use muster_types::{Definition, ServiceClassDefinition, ToolCall, ToolInvoker, WorkflowDefinition, WorkflowStep};

    async fn seeded() -> McpAggregator {
        let store = Arc::new(MemoryStore::new());
        store
            .create(
                DEFAULT_SCOPE,
                Definition::ServiceClass(ServiceClassDefinition::new(
                    "port-forward",
                    ToolCall::new("x_pf_start"),
                    ToolCall::new("x_pf_stop"),
                )),
            )
            .await
            .unwrap();
        store
            .create(
                "staging",
                Definition::Workflow(WorkflowDefinition::new("deploy", vec![WorkflowStep::new("one", "x_one")])),
            )
            .await
            .unwrap();

        let tools = McpAggregator::new();
        register(&tools, store);
        tools
    }

    #[tokio::test]
    async fn test_core_tools_are_exposed() {
        let tools = seeded().await;
        assert!(tools.is_available(SERVICECLASS_LIST));
        assert!(tools.available_tool_names().contains(WORKFLOW_LIST));
    }

    #[tokio::test]
    async fn test_serviceclass_list_defaults_scope() {
        let tools = seeded().await;
        let result = tools.execute(SERVICECLASS_LIST, json!({})).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.content["scope"], json!("default"));
        assert_eq!(result.content["serviceClasses"], json!(["port-forward"]));
    }

    #[tokio::test]
    async fn test_workflow_list_honors_scope() {
        let tools = seeded().await;
        let result = tools.execute(WORKFLOW_LIST, json!({"scope": "staging"})).await.unwrap();
        assert_eq!(result.content["workflows"], json!(["deploy"]));

        let empty = tools.execute(WORKFLOW_LIST, json!({})).await.unwrap();
        assert_eq!(empty.content["workflows"], json!([]));
    }
}
