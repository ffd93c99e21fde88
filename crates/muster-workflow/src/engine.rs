//! Workflow execution engine.
//!
//! A run is a single linear pass over the steps in declaration order. Each
//! step may be guarded by a condition, has its arguments resolved strictly
//! against the run's context, and either binds its outputs or fails. A
//! failure without `allowFailure` halts the run and skips every later step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use muster_config::WorkflowConfig;
use muster_events::{EventData, EventEmitter, ReasonCode};
use muster_template::{explain, extract_outputs, result_payload};
use muster_types::{
    Definition, DefinitionKind, DefinitionStore, DefinitionStoreExt, ExecutionOutcome, ExecutionStore,
    MusterError, Result, SkipReason, StepOutcome, StepRecord, ToolInvoker, ToolResult, WorkflowCondition,
    WorkflowDefinition, WorkflowExecution, WorkflowStep, validate_args,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::tracker::ExecutionTracker;

/// Engine options.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Write the in-progress record after every step.
    pub persist_incremental: bool,
}

impl From<&WorkflowConfig> for EngineConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            persist_incremental: config.persist_incremental,
        }
    }
}

/// A tool a workflow needs that the invoker cannot resolve right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTool {
    pub step_id: String,
    pub tool: String,
    /// The tool belongs to the step's condition rather than the step.
    pub condition: bool,
}

/// How a single step ended.
enum StepEnd {
    Completed { payload: Value },
    Skipped,
    Failed(MusterError),
}

/// Runs workflows and manages their definitions.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn DefinitionStore>,
    invoker: Arc<dyn ToolInvoker>,
    events: EventEmitter,
    tracker: ExecutionTracker,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        invoker: Arc<dyn ToolInvoker>,
        events: EventEmitter,
    ) -> Self {
        Self {
            store,
            invoker,
            tracker: ExecutionTracker::new(executions, events.clone()),
            events,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Definitions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_workflow(&self, scope: &str, workflow: WorkflowDefinition) -> Result<()> {
        let (name, steps) = (workflow.name.clone(), workflow.steps.len());
        if let Err(e) = self.store.create(scope, Definition::Workflow(workflow)).await {
            return Err(self.write_failed(scope, &name, e));
        }
        info!(workflow = %name, scope, steps, "Workflow created");
        self.events.emit(
            ReasonCode::WorkflowCreated,
            EventData::new(scope, &name).count(steps as u32),
        );
        Ok(())
    }

    pub async fn update_workflow(&self, scope: &str, workflow: WorkflowDefinition) -> Result<()> {
        let (name, steps) = (workflow.name.clone(), workflow.steps.len());
        if let Err(e) = self.store.update(scope, Definition::Workflow(workflow)).await {
            return Err(self.write_failed(scope, &name, e));
        }
        info!(workflow = %name, scope, steps, "Workflow updated");
        self.events.emit(
            ReasonCode::WorkflowUpdated,
            EventData::new(scope, &name).count(steps as u32),
        );
        Ok(())
    }

    pub async fn delete_workflow(&self, scope: &str, name: &str) -> Result<()> {
        self.store.delete(DefinitionKind::Workflow, scope, name).await?;
        info!(workflow = %name, scope, "Workflow deleted");
        self.events
            .emit(ReasonCode::WorkflowDeleted, EventData::new(scope, name));
        Ok(())
    }

    pub async fn get_workflow(&self, scope: &str, name: &str) -> Result<WorkflowDefinition> {
        self.store.get_workflow(scope, name).await
    }

    pub async fn list_workflows(&self, scope: &str) -> Result<Vec<WorkflowDefinition>> {
        self.store.list_workflows(scope).await
    }

    fn write_failed(&self, scope: &str, name: &str, error: MusterError) -> MusterError {
        if matches!(error, MusterError::DefinitionInvalid { .. }) {
            self.events.emit(
                ReasonCode::WorkflowValidationFailed,
                EventData::new(scope, name).error(&error),
            );
        }
        error
    }

    /// Step and condition tools of `workflow` that cannot be resolved now.
    pub fn missing_tools(&self, workflow: &WorkflowDefinition) -> Vec<MissingTool> {
        let mut missing = Vec::new();
        for step in &workflow.steps {
            if let Some(tool) = step.condition.as_ref().and_then(|c| c.tool.as_ref())
                && !self.invoker.is_available(tool)
            {
                missing.push(MissingTool {
                    step_id: step.id.clone(),
                    tool: tool.clone(),
                    condition: true,
                });
            }
            if !self.invoker.is_available(&step.tool) {
                missing.push(MissingTool {
                    step_id: step.id.clone(),
                    tool: step.tool.clone(),
                    condition: false,
                });
            }
        }
        missing
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Load `name` from the store and run it.
    pub async fn run(
        &self,
        scope: &str,
        name: &str,
        args: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecution> {
        let workflow = self.store.get_workflow(scope, name).await?;
        self.run_definition(scope, &workflow, args, cancel).await
    }

    /// Run `workflow` to completion and persist the record.
    ///
    /// Definition and input errors are returned before any step runs. A step
    /// failure is not an `Err`: the returned record has outcome `Failed` and
    /// names the failing step. Cancellation persists the record as failed and
    /// returns `Cancelled`.
    pub async fn run_definition(
        &self,
        scope: &str,
        workflow: &WorkflowDefinition,
        args: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecution> {
        workflow.validate()?;
        let input = validate_args(&workflow.arg_schema, &args, &workflow.name)?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut execution = WorkflowExecution::begin(&execution_id, &workflow.name, scope, input.clone());
        let mut run = RunContext::new(&workflow.name, &execution_id, &input);
        let base = EventData::new(scope, &workflow.name).execution(&execution_id);
        let started = Instant::now();

        info!(workflow = %workflow.name, execution_id = %execution_id, steps = workflow.steps.len(), "Workflow execution started");
        self.events.emit(ReasonCode::WorkflowExecutionStarted, base.clone());
        self.persist_progress(&execution).await;

        let mut halted: Option<(String, MusterError)> = None;
        let mut unstored_last: Option<(String, Value)> = None;

        for step in &workflow.steps {
            if halted.is_some() {
                execution
                    .steps
                    .push(StepRecord::skipped(&step.id, &step.tool, SkipReason::Halted));
                self.events.emit(
                    ReasonCode::WorkflowStepSkipped,
                    base.clone()
                        .step(&step.id, &step.tool)
                        .detail("halted by an earlier failure"),
                );
                continue;
            }

            let (mut record, end) = self.run_step(&mut run, step, &workflow.name, &base, cancel).await;
            let step_data = base.clone().step(&step.id, &step.tool);
            match end {
                StepEnd::Completed { payload } => {
                    debug!(step = %step.id, tool = %step.tool, "Step completed");
                    self.events
                        .emit(ReasonCode::WorkflowStepCompleted, step_data.duration(Duration::from_millis(record.duration_ms)));
                    unstored_last = (!step.store).then(|| (step.id.clone(), payload));
                }
                StepEnd::Skipped => {
                    debug!(step = %step.id, "Step condition not met, skipping");
                    self.events.emit(
                        ReasonCode::WorkflowStepSkipped,
                        step_data.detail("condition not met"),
                    );
                }
                StepEnd::Failed(error) => {
                    let message = error.to_string();
                    run.record_error(&step.id, &step.tool, &message);
                    record.error = Some(message.clone());
                    let allowed = step.allow_failure && !error.is_cancelled();
                    record.allowed_failure = allowed;
                    warn!(step = %step.id, tool = %step.tool, allowed, error = %message, "Step failed");
                    self.events.emit(
                        ReasonCode::WorkflowStepFailed,
                        step_data.error(&message).allow_failure(allowed),
                    );
                    if !allowed {
                        halted = Some((step.id.clone(), error));
                    }
                }
            }
            execution.steps.push(record);
            self.persist_progress(&execution).await;
        }

        let mut result: Map<String, Value> = run
            .stored_results()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some((step_id, payload)) = unstored_last {
            result.insert(step_id, payload);
        }
        execution.result = Some(Value::Object(result));

        let elapsed = started.elapsed();
        match halted {
            None => {
                execution.finish(ExecutionOutcome::Completed);
                info!(
                    workflow = %workflow.name,
                    execution_id = %execution_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Workflow execution completed"
                );
                self.events.emit(
                    ReasonCode::WorkflowExecutionCompleted,
                    base.count(workflow.steps.len() as u32).duration(elapsed),
                );
                self.tracker.record(&execution).await?;
                Ok(execution)
            }
            Some((step_id, error)) => {
                execution.failed_step = Some(step_id.clone());
                execution.error = Some(error.to_string());
                execution.finish(ExecutionOutcome::Failed);
                warn!(
                    workflow = %workflow.name,
                    execution_id = %execution_id,
                    step = %step_id,
                    error = %error,
                    "Workflow execution failed"
                );
                let tool = workflow
                    .steps
                    .iter()
                    .find(|s| s.id == step_id)
                    .map(|s| s.tool.clone())
                    .unwrap_or_default();
                self.events.emit(
                    ReasonCode::WorkflowExecutionFailed,
                    base.step(&step_id, tool).error(&error),
                );
                self.tracker.record(&execution).await?;
                if error.is_cancelled() {
                    return Err(error);
                }
                Ok(execution)
            }
        }
    }

    async fn run_step(
        &self,
        run: &mut RunContext,
        step: &WorkflowStep,
        workflow: &str,
        base: &EventData,
        cancel: &CancellationToken,
    ) -> (StepRecord, StepEnd) {
        let mut record = StepRecord::skipped(&step.id, &step.tool, SkipReason::ConditionFalse);
        let started_at = Utc::now();
        let started = Instant::now();
        if let Some(condition) = &step.condition {
            match self.condition_holds(run, step, condition, workflow, cancel).await {
                Ok(true) => {}
                Ok(false) => return (record, StepEnd::Skipped),
                Err(e) => {
                    record.outcome = StepOutcome::Failed;
                    record.skip_reason = None;
                    record.started_at = Some(started_at);
                    record.completed_at = Some(Utc::now());
                    record.duration_ms = started.elapsed().as_millis() as u64;
                    return (record, StepEnd::Failed(e));
                }
            }
        }

        record.skip_reason = None;
        record.outcome = StepOutcome::Failed;
        record.started_at = Some(started_at);
        self.events.emit(
            ReasonCode::WorkflowStepStarted,
            base.clone().step(&step.id, &step.tool),
        );

        let end = match run.context().resolve_args(&step.args) {
            Err(e) => StepEnd::Failed(e.for_subject(workflow)),
            Ok(args) => {
                let args = Value::Object(args);
                record.input = Some(args.clone());
                match self.invoke(&step.tool, args, workflow, &step.id, cancel).await {
                    Err(e) => StepEnd::Failed(e),
                    Ok(result) => {
                        let payload = result_payload(&result.content).into_owned();
                        run.bind(&extract_outputs(&result, &step.outputs));
                        if step.store {
                            run.store_result(&step.id, payload.clone());
                            record.stored = Some(payload.clone());
                        }
                        record.outcome = StepOutcome::Completed;
                        StepEnd::Completed { payload }
                    }
                }
            }
        };

        record.completed_at = Some(Utc::now());
        record.duration_ms = started.elapsed().as_millis() as u64;
        (record, end)
    }

    /// Evaluate a step condition: a stored earlier result or a fresh tool call,
    /// checked against `expect`/`expectNot`.
    async fn condition_holds(
        &self,
        run: &RunContext,
        step: &WorkflowStep,
        condition: &WorkflowCondition,
        workflow: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let result = match (&condition.from_step, &condition.tool) {
            (Some(from), _) => match run.stored(from) {
                Some(stored) => ToolResult::ok(stored.clone()),
                None => {
                    debug!(step = %step.id, from_step = %from, "No stored result to test, condition is false");
                    return Ok(false);
                }
            },
            (None, Some(tool)) => {
                let args = run
                    .context()
                    .resolve_args(&condition.args)
                    .map_err(|e| e.for_subject(workflow))?;
                self.call(tool, Value::Object(args), workflow, &step.id, cancel).await?
            }
            // Rejected by validation
            (None, None) => return Ok(true),
        };

        match explain(&result, condition.expect.as_ref(), condition.expect_not.as_ref()) {
            Ok(()) => Ok(true),
            Err(detail) => {
                debug!(step = %step.id, detail = %detail, "Condition not met");
                Ok(false)
            }
        }
    }

    /// Dispatch one call and hand back whatever the tool answered. A call the
    /// invoker could not complete becomes an error result, so expectations
    /// can still test it. Only cancellation is an `Err`.
    async fn call(
        &self,
        tool: &str,
        args: Value,
        workflow: &str,
        step_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(MusterError::cancelled(workflow, format!("step '{}'", step_id)));
            }
            outcome = self.invoker.execute(tool, args) => outcome,
        };
        Ok(outcome.unwrap_or_else(|e| ToolResult::error(e.to_string())))
    }

    /// Dispatch one step call. A tool-reported error becomes `ToolInvocationFailed`.
    async fn invoke(
        &self,
        tool: &str,
        args: Value,
        workflow: &str,
        step_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let result = self.call(tool, args, workflow, step_id, cancel).await?;
        if result.is_success() {
            return Ok(result);
        }
        Err(MusterError::ToolInvocationFailed {
            subject: workflow.to_string(),
            operation: format!("step '{}'", step_id),
            tool: tool.to_string(),
            message: result.text(),
        })
    }

    async fn persist_progress(&self, execution: &WorkflowExecution) {
        if !self.config.persist_incremental {
            return;
        }
        if let Err(e) = self.tracker.record(execution).await {
            warn!(execution_id = %execution.execution_id, error = %e, "Failed to persist execution progress");
        }
    }
}
