//! Storage contracts consumed by the orchestrator and the workflow engine.

use async_trait::async_trait;

use crate::definition::{Definition, DefinitionKind, ServiceClassDefinition, WorkflowDefinition};
use crate::error::{MusterError, Result};
use crate::execution::WorkflowExecution;

/// Uniform create/read/update/delete/list access to definition documents.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetch one definition, or `DefinitionNotFound`.
    async fn get(&self, kind: DefinitionKind, scope: &str, name: &str) -> Result<Definition>;

    /// All definitions of `kind` in `scope`, ordered by name.
    async fn list(&self, kind: DefinitionKind, scope: &str) -> Result<Vec<Definition>>;

    /// Insert a new definition, or `DefinitionAlreadyExists`.
    async fn create(&self, scope: &str, definition: Definition) -> Result<()>;

    /// Replace an existing definition, or `DefinitionNotFound`.
    async fn update(&self, scope: &str, definition: Definition) -> Result<()>;

    /// Remove a definition, or `DefinitionNotFound`.
    async fn delete(&self, kind: DefinitionKind, scope: &str, name: &str) -> Result<()>;
}

/// Typed helpers over [`DefinitionStore`].
#[async_trait]
pub trait DefinitionStoreExt: DefinitionStore {
    async fn get_service_class(&self, scope: &str, name: &str) -> Result<ServiceClassDefinition> {
        match self.get(DefinitionKind::ServiceClass, scope, name).await? {
            Definition::ServiceClass(c) => Ok(c),
            Definition::Workflow(_) => Err(MusterError::not_found(DefinitionKind::ServiceClass, scope, name)),
        }
    }

    async fn list_service_classes(&self, scope: &str) -> Result<Vec<ServiceClassDefinition>> {
        Ok(self
            .list(DefinitionKind::ServiceClass, scope)
            .await?
            .into_iter()
            .filter_map(|d| match d {
                Definition::ServiceClass(c) => Some(c),
                Definition::Workflow(_) => None,
            })
            .collect())
    }

    async fn get_workflow(&self, scope: &str, name: &str) -> Result<WorkflowDefinition> {
        match self.get(DefinitionKind::Workflow, scope, name).await? {
            Definition::Workflow(w) => Ok(w),
            Definition::ServiceClass(_) => Err(MusterError::not_found(DefinitionKind::Workflow, scope, name)),
        }
    }

    async fn list_workflows(&self, scope: &str) -> Result<Vec<WorkflowDefinition>> {
        Ok(self
            .list(DefinitionKind::Workflow, scope)
            .await?
            .into_iter()
            .filter_map(|d| match d {
                Definition::Workflow(w) => Some(w),
                Definition::ServiceClass(_) => None,
            })
            .collect())
    }
}

impl<T: DefinitionStore + ?Sized> DefinitionStoreExt for T {}

/// Persistence for workflow execution records.
///
/// A record whose outcome is terminal is immutable; saving over it fails.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Write (or overwrite an in-progress) record.
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Fetch a record by execution id, or `ExecutionNotFound`.
    async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution>;

    /// All records, optionally restricted to one workflow. No ordering guaranteed.
    async fn list_executions(&self, workflow: Option<&str>) -> Result<Vec<WorkflowExecution>>;
}
