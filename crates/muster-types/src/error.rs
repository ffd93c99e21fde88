//! Error taxonomy shared by the orchestrator, the workflow engine and the stores.

use std::time::Duration;

use thiserror::Error;

use crate::definition::DefinitionKind;
use crate::instance::ServiceState;

/// Result type for Muster operations.
pub type Result<T> = std::result::Result<T, MusterError>;

/// Errors surfaced by Muster operations.
///
/// Every variant names the subject it concerns (instance, class or workflow)
/// so that a rendered message is self-explanatory without extra context.
#[derive(Debug, Error)]
pub enum MusterError {
    /// A definition document does not exist in the store.
    #[error("{kind} '{name}' not found in scope '{scope}'")]
    DefinitionNotFound {
        kind: DefinitionKind,
        scope: String,
        name: String,
    },

    /// A definition with the same key already exists.
    #[error("{kind} '{name}' already exists in scope '{scope}'")]
    DefinitionAlreadyExists {
        kind: DefinitionKind,
        scope: String,
        name: String,
    },

    /// A definition failed validation (schema, cycle, required fields).
    #[error("invalid {kind} '{name}': {reason}")]
    DefinitionInvalid {
        kind: DefinitionKind,
        name: String,
        reason: String,
    },

    /// A service class (or one of its transitive dependencies) is not available.
    #[error(
        "cannot {operation} '{subject}': service class '{class}' requires '{unmet}', which is unavailable (missing tools: {})",
        .missing_tools.join(", ")
    )]
    DependencyUnavailable {
        subject: String,
        operation: String,
        class: String,
        unmet: String,
        missing_tools: Vec<String>,
    },

    /// A tool call returned an error or could not be dispatched.
    #[error("{operation} of '{subject}' failed: tool '{tool}': {message}")]
    ToolInvocationFailed {
        subject: String,
        operation: String,
        tool: String,
        message: String,
    },

    /// A tool call exceeded its timeout.
    #[error("{operation} of '{subject}' timed out after {timeout:?} waiting for tool '{tool}'")]
    ToolTimeout {
        subject: String,
        operation: String,
        tool: String,
        timeout: Duration,
    },

    /// A template referenced a variable that is not in the context.
    #[error("template resolution failed for '{subject}': {message}")]
    TemplateResolutionFailed { subject: String, message: String },

    /// A tool result did not satisfy its expectation.
    #[error("{operation} of '{subject}': expectation not met: {detail}")]
    ExpectationNotMet {
        subject: String,
        operation: String,
        detail: String,
    },

    /// Supplied arguments do not match the argument schema.
    #[error("invalid arguments for '{subject}': {message}")]
    InputValidation { subject: String, message: String },

    /// No service instance with this key.
    #[error("service instance '{name}' not found in scope '{scope}'")]
    InstanceNotFound { scope: String, name: String },

    /// A service instance with this key already exists.
    #[error("service instance '{name}' already exists in scope '{scope}'")]
    InstanceAlreadyExists { scope: String, name: String },

    /// A lifecycle transition that the state machine does not allow.
    #[error("service instance '{instance}' cannot move from {from} to {to}")]
    InvalidTransition {
        instance: String,
        from: ServiceState,
        to: ServiceState,
    },

    /// No workflow execution record with this id.
    #[error("workflow execution '{0}' not found")]
    ExecutionNotFound(String),

    /// The caller cancelled the operation.
    #[error("{operation} of '{subject}' was cancelled")]
    Cancelled { subject: String, operation: String },

    /// Storage backend failure.
    #[error("store error: {0}")]
    Store(String),
}

impl MusterError {
    /// Create an invalid-definition error.
    pub fn invalid(kind: DefinitionKind, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DefinitionInvalid {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error for a definition.
    pub fn not_found(kind: DefinitionKind, scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DefinitionNotFound {
            kind,
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for a definition.
    pub fn already_exists(
        kind: DefinitionKind,
        scope: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::DefinitionAlreadyExists {
            kind,
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a cancellation error.
    pub fn cancelled(subject: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Cancelled {
            subject: subject.into(),
            operation: operation.into(),
        }
    }

    /// Whether this error was caused by a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ToolTimeout { .. })
    }

    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this error is a definition-level problem that must never be retried.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::DefinitionNotFound { .. }
                | Self::DefinitionAlreadyExists { .. }
                | Self::DefinitionInvalid { .. }
                | Self::DependencyUnavailable { .. }
                | Self::InputValidation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_unavailable_display() {
        let err = MusterError::DependencyUnavailable {
            subject: "api-1".into(),
            operation: "start".into(),
            class: "api".into(),
            unmet: "db".into(),
            missing_tools: vec!["db_start".into(), "db_stop".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("api-1"));
        assert!(msg.contains("'db'"));
        assert!(msg.contains("db_start, db_stop"));
    }

    #[test]
    fn test_timeout_display_and_predicate() {
        let err = MusterError::ToolTimeout {
            subject: "api-1".into(),
            operation: "health check".into(),
            tool: "x_health".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("5s"));
        assert!(!err.is_definition_error());
    }

    #[test]
    fn test_definition_errors_classified() {
        let err = MusterError::not_found(DefinitionKind::Workflow, "default", "deploy");
        assert!(err.is_definition_error());
        assert_eq!(
            err.to_string(),
            "Workflow 'deploy' not found in scope 'default'"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = MusterError::InvalidTransition {
            instance: "api-1".into(),
            from: ServiceState::Stopped,
            to: ServiceState::Running,
        };
        assert_eq!(
            err.to_string(),
            "service instance 'api-1' cannot move from stopped to running"
        );
    }
}
