//! Stable reason codes for lifecycle and execution events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    ServiceInstance,
    ServiceClass,
    Workflow,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceInstance => write!(f, "ServiceInstance"),
            Self::ServiceClass => write!(f, "ServiceClass"),
            Self::Workflow => write!(f, "Workflow"),
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

macro_rules! reason_codes {
    ($($variant:ident => $kind:ident, $severity:ident;)*) => {
        /// Stable identifier of an event type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ReasonCode {
            $($variant,)*
        }

        impl ReasonCode {
            /// Every reason code, in declaration order.
            pub const ALL: &'static [ReasonCode] = &[$(ReasonCode::$variant,)*];

            /// The stable string form, e.g. `ServiceInstanceStarted`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                }
            }

            /// The subject kind this reason applies to.
            pub fn subject_kind(&self) -> SubjectKind {
                match self {
                    $(Self::$variant => SubjectKind::$kind,)*
                }
            }

            /// Default severity of events with this reason.
            pub fn severity(&self) -> Severity {
                match self {
                    $(Self::$variant => Severity::$severity,)*
                }
            }

            /// Parse the stable string form.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $(stringify!($variant) => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

reason_codes! {
    ServiceInstanceCreated => ServiceInstance, Normal;
    ServiceInstanceStarting => ServiceInstance, Normal;
    ServiceInstanceStarted => ServiceInstance, Normal;
    ServiceInstanceStopping => ServiceInstance, Normal;
    ServiceInstanceStopped => ServiceInstance, Normal;
    ServiceInstanceRestarting => ServiceInstance, Normal;
    ServiceInstanceRestarted => ServiceInstance, Normal;
    ServiceInstanceDeleted => ServiceInstance, Normal;
    ServiceInstanceFailed => ServiceInstance, Warning;
    ServiceInstanceHealthy => ServiceInstance, Normal;
    ServiceInstanceUnhealthy => ServiceInstance, Warning;
    ServiceInstanceHealthCheckFailed => ServiceInstance, Warning;
    ServiceInstanceHealthCheckRecovered => ServiceInstance, Normal;
    ServiceInstanceRecoveryStarted => ServiceInstance, Normal;
    ServiceInstanceRecoveryFailed => ServiceInstance, Warning;
    ServiceClassCreated => ServiceClass, Normal;
    ServiceClassUpdated => ServiceClass, Normal;
    ServiceClassDeleted => ServiceClass, Normal;
    ServiceClassValidationFailed => ServiceClass, Warning;
    ServiceClassAvailable => ServiceClass, Normal;
    ServiceClassUnavailable => ServiceClass, Warning;
    WorkflowCreated => Workflow, Normal;
    WorkflowUpdated => Workflow, Normal;
    WorkflowDeleted => Workflow, Normal;
    WorkflowValidationFailed => Workflow, Warning;
    WorkflowExecutionStarted => Workflow, Normal;
    WorkflowExecutionCompleted => Workflow, Normal;
    WorkflowExecutionFailed => Workflow, Warning;
    WorkflowExecutionTracked => Workflow, Normal;
    WorkflowStepStarted => Workflow, Normal;
    WorkflowStepCompleted => Workflow, Normal;
    WorkflowStepFailed => Workflow, Warning;
    WorkflowStepSkipped => Workflow, Normal;
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
