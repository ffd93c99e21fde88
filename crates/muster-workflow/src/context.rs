//! Variable bindings of a single workflow run.

use std::collections::BTreeMap;

use muster_template::ExecutionContext;
use serde_json::{Map, Value, json};

/// The live context of one run: inputs, bound outputs, stored results and
/// errors of failed steps.
///
/// ```text
/// {
///   "args":     { ...input... },
///   "input":    { ...input... },
///   "workflow": { "name": "deploy", "executionId": "..." },
///   "results":  { "<stepId>": <stored result> },
///   "errors":   { "<stepId>": "<message>" },
///   "lastError": { "stepId": "...", "tool": "...", "message": "..." },
///   "<output var>": <value>
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    ctx: ExecutionContext,
    results: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn new(workflow: &str, execution_id: &str, input: &Map<String, Value>) -> Self {
        let mut ctx = ExecutionContext::new();
        ctx.insert("args", Value::Object(input.clone()));
        ctx.insert("input", Value::Object(input.clone()));
        ctx.insert(
            "workflow",
            json!({ "name": workflow, "executionId": execution_id }),
        );
        Self {
            ctx,
            results: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Bind extracted step outputs at the root.
    pub fn bind(&mut self, outputs: &Map<String, Value>) {
        self.ctx.extend(outputs);
    }

    /// Keep a step's result for `fromStep` conditions and `results.<id>`.
    pub fn store_result(&mut self, step_id: &str, value: Value) {
        self.ctx.insert_nested("results", step_id, value.clone());
        self.results.insert(step_id.to_string(), value);
    }

    pub fn stored(&self, step_id: &str) -> Option<&Value> {
        self.results.get(step_id)
    }

    pub fn stored_results(&self) -> &BTreeMap<String, Value> {
        &self.results
    }

    /// Expose a failed step's error to later steps.
    pub fn record_error(&mut self, step_id: &str, tool: &str, message: &str) {
        self.ctx.insert_nested("errors", step_id, Value::String(message.to_string()));
        self.ctx.insert(
            "lastError",
            json!({ "stepId": step_id, "tool": tool, "message": message }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_shape() {
        let mut input = Map::new();
        input.insert("name".into(), json!("demo"));
        let run = RunContext::new("deploy", "e-1", &input);
        assert_eq!(run.context().lookup("args.name"), Some(&json!("demo")));
        assert_eq!(run.context().lookup("input.name"), Some(&json!("demo")));
        assert_eq!(run.context().lookup("workflow.executionId"), Some(&json!("e-1")));
    }

    #[test]
    fn test_results_and_errors() {
        let mut run = RunContext::new("deploy", "e-1", &Map::new());
        run.store_result("create", json!({"status": "ok"}));
        run.record_error("verify", "x_status", "boom");

        assert_eq!(run.context().lookup("results.create.status"), Some(&json!("ok")));
        assert_eq!(run.context().lookup("errors.verify"), Some(&json!("boom")));
        assert_eq!(run.context().lookup("lastError.tool"), Some(&json!("x_status")));
        assert_eq!(run.stored("create"), Some(&json!({"status": "ok"})));
    }
}
