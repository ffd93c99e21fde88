//! Workflow execution for Muster.
//!
//! [`WorkflowEngine`] runs a [`muster_types::WorkflowDefinition`] as a single
//! linear pass over its steps, dispatching each tool through a
//! [`muster_types::ToolInvoker`] and recording the run as a
//! [`muster_types::WorkflowExecution`]. [`ExecutionTracker`] persists those
//! records and answers queries over them.
//!
//! ```text
//! step ─▶ condition? ─false─▶ Skipped
//!             │true
//!             ▼
//!        resolve args ─▶ invoke ─ok─▶ bind outputs / store result ─▶ Completed
//!                                  └err─▶ allowFailure? ─yes─▶ Failed (allowed), continue
//!                                                      └no──▶ Failed, later steps Skipped
//! ```

mod context;
mod engine;
mod tracker;

pub use context::RunContext;
pub use engine::{EngineConfig, MissingTool, WorkflowEngine};
pub use tracker::{ExecutionFilter, ExecutionTracker};
