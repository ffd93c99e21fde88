//! In-memory store, used when the definitions directory is unavailable and in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use muster_types::{
    Definition, DefinitionKind, DefinitionStore, ExecutionStore, MusterError, Result,
    ServiceClassDefinition, WorkflowExecution,
};
use parking_lot::RwLock;

use crate::validate::validate_for_write;

type DefinitionKey = (DefinitionKind, String, String);

/// Process-local definitions and execution records. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    definitions: RwLock<BTreeMap<DefinitionKey, Definition>>,
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope_classes(&self, scope: &str) -> Vec<ServiceClassDefinition> {
        self.definitions
            .read()
            .iter()
            .filter(|((k, s, _), _)| *k == DefinitionKind::ServiceClass && s == scope)
            .filter_map(|(_, d)| match d {
                Definition::ServiceClass(c) => Some(c.clone()),
                Definition::Workflow(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn get(&self, kind: DefinitionKind, scope: &str, name: &str) -> Result<Definition> {
        self.definitions
            .read()
            .get(&(kind, scope.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| MusterError::not_found(kind, scope, name))
    }

    async fn list(&self, kind: DefinitionKind, scope: &str) -> Result<Vec<Definition>> {
        Ok(self
            .definitions
            .read()
            .iter()
            .filter(|((k, s, _), _)| *k == kind && s == scope)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn create(&self, scope: &str, definition: Definition) -> Result<()> {
        let kind = definition.kind();
        let key = (kind, scope.to_string(), definition.name().to_string());
        validate_for_write(&definition, &self.scope_classes(scope))?;

        let mut definitions = self.definitions.write();
        if definitions.contains_key(&key) {
            return Err(MusterError::already_exists(kind, scope, key.2));
        }
        definitions.insert(key, definition);
        Ok(())
    }

    async fn update(&self, scope: &str, definition: Definition) -> Result<()> {
        let kind = definition.kind();
        let key = (kind, scope.to_string(), definition.name().to_string());
        if !self.definitions.read().contains_key(&key) {
            return Err(MusterError::not_found(kind, scope, key.2));
        }
        validate_for_write(&definition, &self.scope_classes(scope))?;

        let mut definitions = self.definitions.write();
        match definitions.get_mut(&key) {
            Some(slot) => {
                *slot = definition;
                Ok(())
            }
            // Deleted between the check and the write
            None => Err(MusterError::not_found(kind, scope, key.2)),
        }
    }

    async fn delete(&self, kind: DefinitionKind, scope: &str, name: &str) -> Result<()> {
        self.definitions
            .write()
            .remove(&(kind, scope.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| MusterError::not_found(kind, scope, name))
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut executions = self.executions.write();
        if let Some(existing) = executions.get(&execution.execution_id) {
            if existing.outcome.is_terminal() {
                return Err(MusterError::store(format!(
                    "execution '{}' is already {} and cannot be overwritten",
                    execution.execution_id, existing.outcome
                )));
            }
        }
        executions.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution> {
        self.executions
            .read()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| MusterError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn list_executions(&self, workflow: Option<&str>) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .read()
            .values()
            .filter(|e| workflow.is_none_or(|w| e.workflow_name == w))
            .cloned()
            .collect())
    }
}
