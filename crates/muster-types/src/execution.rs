//! Workflow execution records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's condition evaluated false.
    ConditionFalse,
    /// An earlier step failed without `allowFailure`.
    Halted,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    InProgress,
    Completed,
    Failed,
}

impl ExecutionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-step status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub tool: String,
    pub outcome: StepOutcome,
    /// Set when the step failed but `allowFailure` let the run continue.
    #[serde(default)]
    pub allowed_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Resolved arguments the tool was called with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Full result content when the step sets `store`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepRecord {
    /// A step that was never attempted.
    pub fn skipped(step_id: impl Into<String>, tool: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            step_id: step_id.into(),
            tool: tool.into(),
            outcome: StepOutcome::Skipped,
            allowed_failure: false,
            skip_reason: Some(reason),
            input: None,
            stored: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
        }
    }
}

/// The persisted record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_name: String,
    pub scope: String,
    /// Input arguments after schema defaults were applied.
    pub input: Map<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub outcome: ExecutionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl WorkflowExecution {
    /// Start a new in-progress record.
    pub fn begin(
        execution_id: impl Into<String>,
        workflow_name: impl Into<String>,
        scope: impl Into<String>,
        input: Map<String, Value>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_name: workflow_name.into(),
            scope: scope.into(),
            input,
            steps: Vec::new(),
            outcome: ExecutionOutcome::InProgress,
            failed_step: None,
            error: None,
            result: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
        }
    }

    /// Look up a step record by id.
    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Close the record with `outcome`.
    pub fn finish(&mut self, outcome: ExecutionOutcome) {
        let now = Utc::now();
        self.outcome = outcome;
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
    }

    /// Copy of the record without step details.
    pub fn summary(&self) -> Self {
        Self {
            steps: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_timestamps() {
        let mut exec = WorkflowExecution::begin("id-1", "deploy", "default", Map::new());
        assert!(!exec.outcome.is_terminal());
        exec.finish(ExecutionOutcome::Completed);
        assert!(exec.outcome.is_terminal());
        assert!(exec.completed_at.is_some());
    }

    #[test]
    fn test_summary_drops_steps() {
        let mut exec = WorkflowExecution::begin("id-1", "deploy", "default", Map::new());
        exec.steps
            .push(StepRecord::skipped("a", "t", SkipReason::ConditionFalse));
        assert!(exec.step("a").is_some());
        assert!(exec.summary().steps.is_empty());
    }

    #[test]
    fn test_outcome_serde() {
        let json = serde_json::to_string(&ExecutionOutcome::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
