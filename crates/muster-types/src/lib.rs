//! Shared types for Muster: definition documents, runtime records, the error
//! taxonomy and the storage/tool interfaces.

pub mod args;
pub mod definition;
pub mod dependency;
pub mod duration;
pub mod error;
pub mod execution;
pub mod instance;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tool;

pub use args::validate_args;
pub use definition::{
    ArgDefinition, ArgSchema, DEFAULT_SCOPE, Definition, DefinitionKind, Expectation,
    HealthCheckPolicy, HealthCheckToolCall, LifecycleTools, ServiceClassDefinition,
    ServiceConfig, TimeoutPolicy, ToolCall, WorkflowCondition, WorkflowDefinition, WorkflowStep,
};
pub use dependency::check_class_graph;
pub use duration::parse_duration;
pub use error::{MusterError, Result};
pub use execution::{ExecutionOutcome, SkipReason, StepOutcome, StepRecord, WorkflowExecution};
pub use instance::{BackoffStatus, HealthCounters, ServiceInstance, ServiceState};
pub use store::{DefinitionStore, DefinitionStoreExt, ExecutionStore};
#[cfg(any(test, feature = "test-utils"))]
pub use testing::StubInvoker;
pub use tool::{CORE_TOOL_PREFIX, ToolError, ToolInvoker, ToolResult, is_core_tool};
