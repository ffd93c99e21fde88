//! Persistence and queries over workflow execution records.

use std::sync::Arc;

use muster_events::{EventData, EventEmitter, ReasonCode};
use muster_types::{ExecutionOutcome, ExecutionStore, MusterError, Result, StepRecord, WorkflowExecution};
use tracing::debug;

/// Filter for [`ExecutionTracker::list`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow: Option<String>,
    pub outcome: Option<ExecutionOutcome>,
    /// Maximum number of records; unlimited when unset.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ExecutionFilter {
    pub fn for_workflow(workflow: impl Into<String>) -> Self {
        Self {
            workflow: Some(workflow.into()),
            ..Default::default()
        }
    }

    pub fn with_outcome(mut self, outcome: ExecutionOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Writes execution records and answers queries over them.
#[derive(Clone)]
pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    events: EventEmitter,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, events: EventEmitter) -> Self {
        Self { store, events }
    }

    /// Persist `execution`. Terminal records can be written only once.
    pub async fn record(&self, execution: &WorkflowExecution) -> Result<()> {
        self.store.save_execution(execution).await?;
        debug!(
            execution_id = %execution.execution_id,
            workflow = %execution.workflow_name,
            outcome = %execution.outcome,
            "Execution record written"
        );
        if execution.outcome.is_terminal() {
            self.events.emit(
                ReasonCode::WorkflowExecutionTracked,
                EventData::new(&execution.scope, &execution.workflow_name).execution(&execution.execution_id),
            );
        }
        Ok(())
    }

    /// Fetch a record; without `include_steps` only the summary is returned.
    pub async fn get(&self, execution_id: &str, include_steps: bool) -> Result<WorkflowExecution> {
        let execution = self.store.get_execution(execution_id).await?;
        Ok(if include_steps {
            execution
        } else {
            execution.summary()
        })
    }

    pub async fn get_step(&self, execution_id: &str, step_id: &str) -> Result<StepRecord> {
        let execution = self.store.get_execution(execution_id).await?;
        execution
            .step(step_id)
            .cloned()
            .ok_or_else(|| MusterError::ExecutionNotFound(format!("{} (step '{}')", execution_id, step_id)))
    }

    /// Matching records as summaries, newest first.
    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<WorkflowExecution>> {
        let mut executions = self.store.list_executions(filter.workflow.as_deref()).await?;
        executions.retain(|e| filter.outcome.is_none_or(|o| e.outcome == o));
        executions.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.execution_id.cmp(&a.execution_id))
        });
        Ok(executions
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(|e| e.summary())
            .collect())
    }
}
