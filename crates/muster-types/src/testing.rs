//! Scripted [`ToolInvoker`] for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use crate::tool::{ToolError, ToolInvoker, ToolResult, is_core_tool};

type Scripted = Result<ToolResult, ToolError>;

/// A tool invoker that returns scripted results and records every call.
///
/// Tools must be registered to be available. A registered tool without a
/// script returns an empty successful result. One-shot responses queued with
/// [`push_response`](Self::push_response) are used before the standing one
/// set with [`set_response`](Self::set_response).
#[derive(Default)]
pub struct StubInvoker {
    available: RwLock<Arc<HashSet<String>>>,
    standing: Mutex<HashMap<String, Scripted>>,
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub with these tools registered.
    pub fn with_tools<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stub = Self::new();
        *stub.available.write() = Arc::new(names.into_iter().map(Into::into).collect());
        stub
    }

    pub fn add_tool(&self, name: impl Into<String>) {
        let mut set = (**self.available.read()).clone();
        set.insert(name.into());
        *self.available.write() = Arc::new(set);
    }

    pub fn remove_tool(&self, name: &str) {
        let mut set = (**self.available.read()).clone();
        set.remove(name);
        *self.available.write() = Arc::new(set);
    }

    /// Respond to every call of `tool` with `response`.
    pub fn set_response(&self, tool: impl Into<String>, response: Scripted) {
        self.standing.lock().insert(tool.into(), response);
    }

    /// Respond to the next call of `tool` with `response`.
    pub fn push_response(&self, tool: impl Into<String>, response: Scripted) {
        self.queued.lock().entry(tool.into()).or_default().push_back(response);
    }

    /// Delay every call of `tool` by `delay` before responding.
    pub fn set_delay(&self, tool: impl Into<String>, delay: Duration) {
        self.delays.lock().insert(tool.into(), delay);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Arguments of every call to `tool`, in order.
    pub fn calls_to(&self, tool: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls.lock().iter().filter(|(name, _)| name == tool).count()
    }
}

#[async_trait]
impl ToolInvoker for StubInvoker {
    async fn execute(&self, name: &str, args: Value) -> Result<ToolResult, ToolError> {
        self.calls.lock().push((name.to_string(), args));

        let delay = self.delays.lock().get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.is_available(name) {
            return Err(ToolError::NotFound(name.to_string()));
        }
        let next = self.queued.lock().get_mut(name).and_then(VecDeque::pop_front);
        if let Some(response) = next {
            return response;
        }
        let standing = self.standing.lock().get(name).cloned();
        standing.unwrap_or_else(|| Ok(ToolResult::ok(json!({}))))
    }

    fn available_tool_names(&self) -> Arc<HashSet<String>> {
        self.available.read().clone()
    }

    fn is_available(&self, name: &str) -> bool {
        is_core_tool(name) || self.available.read().contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses() {
        let stub = StubInvoker::with_tools(["x_a"]);
        stub.set_response("x_a", Ok(ToolResult::ok(json!({"n": 1}))));
        stub.push_response("x_a", Ok(ToolResult::error("first")));

        assert!(!stub.execute("x_a", json!({})).await.unwrap().is_success());
        assert_eq!(stub.execute("x_a", json!({})).await.unwrap().content, json!({"n": 1}));
        assert_eq!(stub.call_count("x_a"), 2);
    }

    #[tokio::test]
    async fn test_unregistered_tool_not_found() {
        let stub = StubInvoker::new();
        let err = stub.execute("x_b", json!({"k": "v"})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("x_b".into()));
        assert_eq!(stub.calls_to("x_b"), vec![json!({"k": "v"})]);

        stub.add_tool("x_b");
        assert!(stub.execute("x_b", json!({})).await.is_ok());
        stub.remove_tool("x_b");
        assert!(!stub.is_available("x_b"));
    }
}
