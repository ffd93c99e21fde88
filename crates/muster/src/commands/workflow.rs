//! Workflow command - definitions, runs and execution history.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use muster_store::read_definition_file;
use muster_types::{
    DEFAULT_SCOPE, Definition, ExecutionOutcome, StepOutcome, WorkflowDefinition, WorkflowExecution,
};
use muster_workflow::{ExecutionFilter, MissingTool};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{Context, print_json};
use crate::runtime::Runtime;

/// Arguments for the workflow command.
#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// List workflows and any tools they are missing
    List {
        #[arg(long, default_value = DEFAULT_SCOPE)]
        scope: String,
    },

    /// Validate a workflow document without storing it
    Validate {
        /// Path to a .toml, .yaml or .yml document
        file: PathBuf,
    },

    /// Run a stored workflow
    Run {
        /// Workflow name
        name: String,

        #[arg(long, default_value = DEFAULT_SCOPE)]
        scope: String,

        /// Input argument as KEY=VALUE; VALUE is parsed as JSON when it can be
        #[arg(long = "arg", short = 'a', value_parser = parse_key_value)]
        args: Vec<(String, Value)>,
    },

    /// List recorded executions, newest first
    Executions {
        /// Only executions of this workflow
        #[arg(long)]
        workflow: Option<String>,

        /// Only executions with this outcome (completed, failed, in_progress)
        #[arg(long, value_parser = parse_outcome)]
        outcome: Option<ExecutionOutcome>,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one execution record
    Execution {
        /// Execution id
        id: String,

        /// Include per-step records
        #[arg(long)]
        steps: bool,
    },
}

/// Run the workflow command.
pub async fn run(args: WorkflowArgs, ctx: &Context) -> Result<()> {
    match args.command {
        WorkflowCommand::List { scope } => cmd_list(&scope, ctx).await,
        WorkflowCommand::Validate { file } => cmd_validate(&file, ctx),
        WorkflowCommand::Run { name, scope, args } => cmd_run(&name, &scope, args, ctx).await,
        WorkflowCommand::Executions {
            workflow,
            outcome,
            limit,
            offset,
        } => {
            let filter = ExecutionFilter {
                workflow,
                outcome,
                limit: Some(limit),
                offset,
            };
            cmd_executions(&filter, ctx).await
        }
        WorkflowCommand::Execution { id, steps } => cmd_execution(&id, steps, ctx).await,
    }
}

async fn cmd_list(scope: &str, ctx: &Context) -> Result<()> {
    let runtime = Runtime::open(&ctx.loaded)?;
    runtime.connect().await;

    let workflows: Vec<(WorkflowDefinition, Vec<MissingTool>)> = runtime
        .engine
        .list_workflows(scope)
        .await?
        .into_iter()
        .map(|w| {
            let missing = runtime.engine.missing_tools(&w);
            (w, missing)
        })
        .collect();
    runtime.close().await;

    if ctx.json_output {
        let rows: Vec<Value> = workflows
            .iter()
            .map(|(w, missing)| {
                serde_json::json!({
                    "name": w.name,
                    "description": w.description,
                    "steps": w.steps.len(),
                    "missingTools": missing,
                })
            })
            .collect();
        return print_json(&rows);
    }
    if workflows.is_empty() {
        println!("No workflows in scope '{}'.", scope);
        return Ok(());
    }

    println!("{:<24} {:<6} {:<6} DESCRIPTION", "NAME", "STEPS", "READY");
    println!("{}", "-".repeat(72));
    for (workflow, missing) in &workflows {
        println!(
            "{:<24} {:<6} {:<6} {}",
            workflow.name,
            workflow.steps.len(),
            if missing.is_empty() { "yes" } else { "no" },
            workflow.description
        );
        if ctx.verbose {
            for m in missing {
                let what = if m.condition { "condition" } else { "step" };
                println!("    {} '{}' needs '{}'", what, m.step_id, m.tool);
            }
        }
    }
    Ok(())
}

fn cmd_validate(file: &std::path::Path, ctx: &Context) -> Result<()> {
    let workflow = match read_definition_file(file)? {
        Definition::Workflow(w) => w,
        Definition::ServiceClass(c) => bail!("{} holds service class '{}', not a workflow", file.display(), c.name),
    };
    workflow.validate()?;

    if ctx.json_output {
        print_json(&serde_json::json!({ "valid": true, "name": workflow.name, "steps": workflow.steps.len() }))
    } else {
        println!("Workflow '{}' is valid ({} steps)", workflow.name, workflow.steps.len());
        Ok(())
    }
}

async fn cmd_run(name: &str, scope: &str, args: Vec<(String, Value)>, ctx: &Context) -> Result<()> {
    let runtime = Runtime::open(&ctx.loaded)?;
    runtime.connect().await;

    let input: Map<String, Value> = args.into_iter().collect();
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = runtime.engine.run(scope, name, input, &cancel).await;
    runtime.close().await;
    let execution = outcome?;

    if ctx.json_output {
        print_json(&execution)?;
    } else {
        print_execution(&execution, true);
    }

    if execution.outcome == ExecutionOutcome::Failed {
        bail!(
            "workflow '{}' failed at step '{}'",
            name,
            execution.failed_step.as_deref().unwrap_or("?")
        );
    }
    Ok(())
}

async fn cmd_executions(filter: &ExecutionFilter, ctx: &Context) -> Result<()> {
    let runtime = Runtime::open(&ctx.loaded)?;
    let executions = runtime.engine.tracker().list(filter).await?;

    if ctx.json_output {
        return print_json(&executions);
    }
    if executions.is_empty() {
        println!("No executions recorded.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<12} {:<10} STARTED",
        "EXECUTION", "WORKFLOW", "OUTCOME", "DURATION"
    );
    println!("{}", "-".repeat(100));
    for e in &executions {
        println!(
            "{:<38} {:<20} {:<12} {:<10} {}",
            e.execution_id,
            e.workflow_name,
            e.outcome.to_string(),
            format!("{}ms", e.duration_ms),
            e.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_execution(id: &str, steps: bool, ctx: &Context) -> Result<()> {
    let runtime = Runtime::open(&ctx.loaded)?;
    let execution = runtime.engine.tracker().get(id, steps).await?;

    if ctx.json_output {
        print_json(&execution)
    } else {
        print_execution(&execution, steps);
        Ok(())
    }
}

fn print_execution(execution: &WorkflowExecution, steps: bool) {
    println!(
        "Workflow '{}' {} in {}ms (execution {})",
        execution.workflow_name, execution.outcome, execution.duration_ms, execution.execution_id
    );
    if let Some(ref error) = execution.error {
        println!("  error: {}", error);
    }
    if steps {
        for step in &execution.steps {
            let marker = match step.outcome {
                StepOutcome::Completed => "✓",
                StepOutcome::Failed if step.allowed_failure => "~",
                StepOutcome::Failed => "✗",
                StepOutcome::Skipped => "·",
            };
            print!("  {} {:<20} {:<30} {}", marker, step.step_id, step.tool, step.outcome);
            match step.error {
                Some(ref error) => println!(" ({})", error),
                None => println!(),
            }
        }
    }
    if let Some(ref result) = execution.result {
        println!("  result: {}", result);
    }
}

/// Parse `KEY=VALUE`, reading VALUE as JSON and falling back to a string.
fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_outcome(raw: &str) -> Result<ExecutionOutcome, String> {
    match raw {
        "completed" => Ok(ExecutionOutcome::Completed),
        "failed" => Ok(ExecutionOutcome::Failed),
        "in_progress" | "in-progress" => Ok(ExecutionOutcome::InProgress),
        other => Err(format!("unknown outcome '{}'", other)),
    }
}
