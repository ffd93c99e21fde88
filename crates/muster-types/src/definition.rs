//! Declarative definition documents: service classes and workflows.
//!
//! Field names follow the document schema (camelCase), e.g.:
//!
//! ```toml
//! [serviceclass]
//! name = "port-forward"
//!
//! [serviceclass.serviceConfig]
//! dependencies = ["kube-auth"]
//!
//! [serviceclass.serviceConfig.lifecycleTools.start]
//! tool = "x_port_forward_start"
//! args = { port = "{{ .args.port }}" }
//! outputs = { "session.id" = "sessionId" }
//!
//! [serviceclass.serviceConfig.lifecycleTools.stop]
//! tool = "x_port_forward_stop"
//! args = { session = "{{ .sessionId }}" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::duration::parse_duration;
use crate::error::{MusterError, Result};

/// Scope used when a caller does not name one.
pub const DEFAULT_SCOPE: &str = "default";

/// Default health check interval when a class does not set one.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Argument types understood by argument schemas.
pub const ARG_TYPES: &[&str] = &["string", "number", "integer", "boolean", "array", "object"];

/// The kinds of document held by a definition store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    ServiceClass,
    Workflow,
}

impl DefinitionKind {
    /// Directory/table name used for this kind in document stores.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::ServiceClass => "serviceclasses",
            Self::Workflow => "workflows",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceClass => write!(f, "ServiceClass"),
            Self::Workflow => write!(f, "Workflow"),
        }
    }
}

/// A definition of either kind, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Definition {
    #[serde(rename = "serviceclass")]
    ServiceClass(ServiceClassDefinition),
    Workflow(WorkflowDefinition),
}

impl Definition {
    /// The definition's kind.
    pub fn kind(&self) -> DefinitionKind {
        match self {
            Self::ServiceClass(_) => DefinitionKind::ServiceClass,
            Self::Workflow(_) => DefinitionKind::Workflow,
        }
    }

    /// The definition's unique name.
    pub fn name(&self) -> &str {
        match self {
            Self::ServiceClass(c) => &c.name,
            Self::Workflow(w) => &w.name,
        }
    }

    /// Run the single-document validation for this definition.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ServiceClass(c) => c.validate(),
            Self::Workflow(w) => w.validate(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared building blocks
// ─────────────────────────────────────────────────────────────────────────────

/// Schema entry for a single argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgDefinition {
    /// Expected JSON type (`string`, `number`, `integer`, `boolean`, `array`, `object`).
    #[serde(rename = "type", default = "default_arg_type")]
    pub arg_type: String,
    /// Whether callers must supply this argument.
    #[serde(default)]
    pub required: bool,
    /// Value applied when the argument is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn default_arg_type() -> String {
    "string".to_string()
}

/// Argument name to schema entry. Ordered so that validation is deterministic.
pub type ArgSchema = BTreeMap<String, ArgDefinition>;

/// A named tool plus templated arguments plus output bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Tool name as known to the tool registry.
    pub tool: String,
    /// Argument name to templated value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Value>,
    /// Result field path to variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl ToolCall {
    /// Create a call to `tool` with no args or outputs.
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Default::default()
        }
    }

    /// Add a templated argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Bind a result field path to a variable.
    pub fn with_output(mut self, path: impl Into<String>, var: impl Into<String>) -> Self {
        self.outputs.insert(path.into(), var.into());
        self
    }
}

/// Declarative success/field-match predicate evaluated against a tool result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    /// Expected success flag. Absent means `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Field path to expected value.
    #[serde(default, alias = "jsonPath", skip_serializing_if = "BTreeMap::is_empty")]
    pub field_checks: BTreeMap<String, Value>,
}

impl Expectation {
    /// Expectation on the success flag only.
    pub fn success(success: bool) -> Self {
        Self {
            success: Some(success),
            field_checks: BTreeMap::new(),
        }
    }

    /// Add a field equality check.
    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field_checks.insert(path.into(), value.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service classes
// ─────────────────────────────────────────────────────────────────────────────

/// A tool call used for health checking, with optional expectations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckToolCall {
    #[serde(flatten)]
    pub call: ToolCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Expectation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_not: Option<Expectation>,
}

/// Lifecycle tool slots of a service class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTools {
    pub start: ToolCall,
    pub stop: ToolCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCall>,
}

/// Periodic health checking settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Interval between checks, e.g. `"30s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Consecutive failures before `Running` becomes `Unhealthy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    /// Consecutive successes before `Unhealthy` becomes `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
}

/// Per-operation tool call timeouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutPolicy {
    /// Bounds `start` and `restart`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    /// Bounds `stop`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    /// Bounds each health check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
}

/// The `serviceConfig` block of a service class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Template for instance names when the caller does not supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_name_template: Option<String>,
    /// Classes that must be available before instances of this class may run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub lifecycle_tools: LifecycleTools,
    #[serde(default)]
    pub health_check_policy: HealthCheckPolicy,
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Output name to template, resolved once the instance has started.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_templates: BTreeMap<String, String>,
}

/// A reusable lifecycle recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arg_schema: ArgSchema,
    pub service_config: ServiceConfig,
}

impl ServiceClassDefinition {
    /// Create a class with the given start and stop tools.
    pub fn new(name: impl Into<String>, start: ToolCall, stop: ToolCall) -> Self {
        Self {
            name: name.into(),
            service_config: ServiceConfig {
                lifecycle_tools: LifecycleTools {
                    start,
                    stop,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Shorthand for the lifecycle tool slots.
    pub fn tools(&self) -> &LifecycleTools {
        &self.service_config.lifecycle_tools
    }

    /// Names of the classes this class depends on.
    pub fn dependencies(&self) -> &[String] {
        &self.service_config.dependencies
    }

    /// Every tool this class can invoke: start, stop and the declared optional slots.
    pub fn required_tools(&self) -> Vec<String> {
        let tools = self.tools();
        let mut names = vec![tools.start.tool.clone(), tools.stop.tool.clone()];
        if let Some(ref restart) = tools.restart {
            names.push(restart.tool.clone());
        }
        if let Some(ref hc) = tools.health_check {
            names.push(hc.call.tool.clone());
        }
        if let Some(ref status) = tools.status {
            names.push(status.tool.clone());
        }
        names.retain(|n| !n.is_empty());
        names.dedup();
        names
    }

    /// Health check interval, defaulting to 30s.
    pub fn health_interval(&self) -> Result<Duration> {
        match self.service_config.health_check_policy.interval.as_deref() {
            Some(s) => parse_duration(s).map_err(|e| self.invalid(e)),
            None => Ok(DEFAULT_HEALTH_INTERVAL),
        }
    }

    /// Parse one of the timeout policy entries; `None` when unset.
    pub fn timeout(&self, select: fn(&TimeoutPolicy) -> Option<&String>) -> Result<Option<Duration>> {
        select(&self.service_config.timeout_policy)
            .map(|s| parse_duration(s).map_err(|e| self.invalid(e)))
            .transpose()
    }

    fn invalid(&self, reason: impl Into<String>) -> MusterError {
        MusterError::invalid(DefinitionKind::ServiceClass, &self.name, reason)
    }

    /// Validate this class in isolation.
    ///
    /// Checks:
    /// - Name is non-empty
    /// - `start` and `stop` name a tool
    /// - Optional lifecycle slots, when present, name a tool
    /// - Health thresholds are at least one
    /// - Durations parse
    /// - The class does not depend on itself
    /// - Argument schema types are known
    ///
    /// Cross-class cycles are checked by [`crate::dependency::check_class_graph`].
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name cannot be empty"));
        }

        let tools = self.tools();
        if tools.start.tool.trim().is_empty() {
            return Err(self.invalid("lifecycleTools.start.tool is required"));
        }
        if tools.stop.tool.trim().is_empty() {
            return Err(self.invalid("lifecycleTools.stop.tool is required"));
        }
        let optional = [
            ("restart", tools.restart.as_ref()),
            ("healthCheck", tools.health_check.as_ref().map(|h| &h.call)),
            ("status", tools.status.as_ref()),
        ];
        for (slot, call) in optional {
            if let Some(call) = call
                && call.tool.trim().is_empty()
            {
                return Err(self.invalid(format!(
                    "lifecycleTools.{}.tool cannot be empty when {} is declared",
                    slot, slot
                )));
            }
        }

        let policy = &self.service_config.health_check_policy;
        if policy.enabled {
            if tools.health_check.is_none() {
                return Err(self.invalid(
                    "healthCheckPolicy is enabled but lifecycleTools.healthCheck is missing",
                ));
            }
            if policy.failure_threshold == Some(0) {
                return Err(self.invalid("healthCheckPolicy.failureThreshold must be at least 1"));
            }
            if policy.success_threshold == Some(0) {
                return Err(self.invalid("healthCheckPolicy.successThreshold must be at least 1"));
            }
        }
        self.health_interval()?;
        self.timeout(|t| t.create.as_ref())?;
        self.timeout(|t| t.delete.as_ref())?;
        self.timeout(|t| t.health_check.as_ref())?;

        if self.dependencies().iter().any(|d| d == &self.name) {
            return Err(self.invalid("a service class cannot depend on itself"));
        }

        validate_arg_schema(&self.arg_schema)
            .map_err(|e| self.invalid(e))?;

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflows
// ─────────────────────────────────────────────────────────────────────────────

/// Step condition: either re-invoke a tool or reuse a stored step result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Expectation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_not: Option<Expectation>,
}

/// A single unit of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Unique identifier within the workflow.
    pub id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<WorkflowCondition>,
    /// Record the full result for later `fromStep` conditions and audit.
    #[serde(default)]
    pub store: bool,
    /// Continue the run when this step fails.
    #[serde(default)]
    pub allow_failure: bool,
    /// Result field path to variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl WorkflowStep {
    /// Create a step invoking `tool`.
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            ..Default::default()
        }
    }

    /// Add a templated argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Set the step condition.
    pub fn with_condition(mut self, condition: WorkflowCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Mark the step result as stored.
    pub fn stored(mut self) -> Self {
        self.store = true;
        self
    }

    /// Allow this step to fail without halting the run.
    pub fn allowing_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Bind a result field path to a variable.
    pub fn with_output(mut self, path: impl Into<String>, var: impl Into<String>) -> Self {
        self.outputs.insert(path.into(), var.into());
        self
    }
}

/// An ordered automation recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arg_schema: ArgSchema,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Create a workflow from its steps.
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            steps,
            ..Default::default()
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> MusterError {
        MusterError::invalid(DefinitionKind::Workflow, &self.name, reason)
    }

    /// Every tool a run of this workflow may invoke, in step order.
    pub fn required_tools(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for step in &self.steps {
            let cond_tool = step.condition.as_ref().and_then(|c| c.tool.clone());
            for name in std::iter::once(step.tool.clone()).chain(cond_tool) {
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Validate the workflow definition.
    ///
    /// Checks:
    /// - Name is non-empty and there is at least one step
    /// - Step IDs are non-empty and unique
    /// - Every step names a tool
    /// - Conditions use exactly one of `tool` or `fromStep`
    /// - `fromStep` names an earlier step marked `store`
    /// - Argument schema types are known
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name cannot be empty"));
        }
        if self.steps.is_empty() {
            return Err(self.invalid("workflow must have at least one step"));
        }

        // id -> stored flag, for steps seen so far
        let mut earlier: BTreeMap<&str, bool> = BTreeMap::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(self.invalid("step id cannot be empty"));
            }
            if earlier.contains_key(step.id.as_str()) {
                return Err(self.invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.tool.trim().is_empty() {
                return Err(self.invalid(format!("step '{}' must name a tool", step.id)));
            }

            if let Some(ref cond) = step.condition {
                match (&cond.tool, &cond.from_step) {
                    (Some(_), Some(_)) => {
                        return Err(self.invalid(format!(
                            "condition of step '{}' cannot set both tool and fromStep",
                            step.id
                        )));
                    }
                    (None, None) => {
                        return Err(self.invalid(format!(
                            "condition of step '{}' must set tool or fromStep",
                            step.id
                        )));
                    }
                    (Some(tool), None) if tool.trim().is_empty() => {
                        return Err(self.invalid(format!(
                            "condition tool of step '{}' cannot be empty",
                            step.id
                        )));
                    }
                    (None, Some(from)) => match earlier.get(from.as_str()) {
                        None => {
                            return Err(self.invalid(format!(
                                "condition of step '{}' references '{}', which is not an earlier step",
                                step.id, from
                            )));
                        }
                        Some(false) => {
                            return Err(self.invalid(format!(
                                "condition of step '{}' references step '{}', which does not set store = true",
                                step.id, from
                            )));
                        }
                        Some(true) => {}
                    },
                    _ => {}
                }
            }

            earlier.insert(step.id.as_str(), step.store);
        }

        validate_arg_schema(&self.arg_schema).map_err(|e| self.invalid(e))?;

        Ok(())
    }
}

fn validate_arg_schema(schema: &ArgSchema) -> std::result::Result<(), String> {
    for (name, def) in schema {
        if !ARG_TYPES.contains(&def.arg_type.as_str()) {
            return Err(format!(
                "argument '{}' has unknown type '{}'",
                name, def.arg_type
            ));
        }
    }
    Ok(())
}
