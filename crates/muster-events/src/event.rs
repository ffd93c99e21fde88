//! Event records and the data their messages are rendered from.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reason::{ReasonCode, Severity, SubjectKind};

/// A structured lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub subject_kind: SubjectKind,
    pub subject_name: String,
    pub subject_scope: String,
    pub reason: ReasonCode,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Fields available to message templates.
///
/// Empty and zero fields are treated as absent by `{{if}}` blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventData {
    pub name: String,
    pub scope: String,
    pub service_class: String,
    pub operation: String,
    pub error: String,
    pub detail: String,
    pub step_id: String,
    pub step_tool: String,
    pub execution_id: String,
    pub duration: Option<Duration>,
    pub step_count: u32,
    pub tool_names: Vec<String>,
    pub allow_failure: bool,
}

impl EventData {
    /// Data naming a subject.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            ..Default::default()
        }
    }

    pub fn service_class(mut self, class: impl Into<String>) -> Self {
        self.service_class = class.into();
        self
    }

    pub fn operation(mut self, op: impl Into<String>) -> Self {
        self.operation = op.into();
        self
    }

    pub fn error(mut self, err: impl ToString) -> Self {
        self.error = err.to_string();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn step(mut self, id: impl Into<String>, tool: impl Into<String>) -> Self {
        self.step_id = id.into();
        self.step_tool = tool.into();
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.step_tool = tool.into();
        self
    }

    pub fn execution(mut self, id: impl Into<String>) -> Self {
        self.execution_id = id.into();
        self
    }

    pub fn duration(mut self, d: Duration) -> Self {
        self.duration = Some(d);
        self
    }

    pub fn count(mut self, n: u32) -> Self {
        self.step_count = n;
        self
    }

    pub fn tools(mut self, names: Vec<String>) -> Self {
        self.tool_names = names;
        self
    }

    pub fn allow_failure(mut self, allowed: bool) -> Self {
        self.allow_failure = allowed;
        self
    }

    /// Template context: camelCase keys, tool names joined, duration humanized.
    pub fn to_context(&self) -> Value {
        let mut m = Map::new();
        m.insert("name".into(), Value::String(self.name.clone()));
        m.insert("scope".into(), Value::String(self.scope.clone()));
        m.insert("serviceClass".into(), Value::String(self.service_class.clone()));
        m.insert("operation".into(), Value::String(self.operation.clone()));
        m.insert("error".into(), Value::String(self.error.clone()));
        m.insert("detail".into(), Value::String(self.detail.clone()));
        m.insert("stepId".into(), Value::String(self.step_id.clone()));
        m.insert("stepTool".into(), Value::String(self.step_tool.clone()));
        m.insert("executionId".into(), Value::String(self.execution_id.clone()));
        m.insert(
            "duration".into(),
            Value::String(self.duration.filter(|d| !d.is_zero()).map(|d| format!("{:?}", d)).unwrap_or_default()),
        );
        m.insert("stepCount".into(), Value::from(self.step_count));
        m.insert("toolNames".into(), Value::String(self.tool_names.join(", ")));
        m.insert("allowFailure".into(), Value::Bool(self.allow_failure));
        Value::Object(m)
    }
}
