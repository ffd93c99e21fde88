//! Per-reason message templates.

use std::collections::HashMap;

use muster_template::{RenderMode, Template, TemplateError};
use tracing::warn;

use crate::event::EventData;
use crate::reason::ReasonCode;

/// Default message template for a reason.
pub fn default_template(reason: ReasonCode) -> &'static str {
    use ReasonCode::*;
    match reason {
        ServiceInstanceCreated => "Service instance {{.name}} created from ServiceClass {{.serviceClass}}",
        ServiceInstanceStarting => "Service instance {{.name}} starting{{if .stepTool}} with tool {{.stepTool}}{{end}}",
        ServiceInstanceStarted => "Service instance {{.name}} started successfully and is running",
        ServiceInstanceStopping => "Service instance {{.name}} stopping{{if .stepTool}} with tool {{.stepTool}}{{end}}",
        ServiceInstanceStopped => "Service instance {{.name}} stopped successfully",
        ServiceInstanceRestarting => "Service instance {{.name}} restarting{{if .stepTool}} with tool {{.stepTool}}{{end}}",
        ServiceInstanceRestarted => "Service instance {{.name}} restarted successfully{{if .duration}} after {{.duration}}{{end}}",
        ServiceInstanceDeleted => "Service instance {{.name}} deleted successfully",
        ServiceInstanceFailed => "Service instance {{.name}}{{if .operation}} {{.operation}}{{end}} operation failed{{if .error}}: {{.error}}{{end}}",
        ServiceInstanceHealthy => "Service instance {{.name}} health checks passing{{if .stepCount}} ({{.stepCount}} consecutive successes){{end}}",
        ServiceInstanceUnhealthy => "Service instance {{.name}} health checks failing{{if .stepCount}} ({{.stepCount}} consecutive failures){{end}}",
        ServiceInstanceHealthCheckFailed => "Service instance {{.name}} health check failed{{if .error}}: {{.error}}{{end}}",
        ServiceInstanceHealthCheckRecovered => "Service instance {{.name}} health check recovered{{if .stepCount}} after {{.stepCount}} consecutive successes{{end}}",
        ServiceInstanceRecoveryStarted => "Service instance {{.name}} automatic recovery started{{if .stepCount}} (attempt {{.stepCount}}){{end}}",
        ServiceInstanceRecoveryFailed => "Service instance {{.name}} automatic recovery failed{{if .error}}: {{.error}}{{end}}",
        ServiceClassCreated => "ServiceClass {{.name}} successfully created in scope {{.scope}}",
        ServiceClassUpdated => "ServiceClass {{.name}} successfully updated in scope {{.scope}}",
        ServiceClassDeleted => "ServiceClass {{.name}} successfully deleted from scope {{.scope}}",
        ServiceClassValidationFailed => "ServiceClass {{.name}} validation failed{{if .error}}: {{.error}}{{end}}",
        ServiceClassAvailable => "ServiceClass {{.name}} is now available (all required tools are accessible)",
        ServiceClassUnavailable => "ServiceClass {{.name}} is unavailable{{if .toolNames}} (missing tools: {{.toolNames}}){{end}}",
        WorkflowCreated => "Workflow {{.name}} successfully created{{if .stepCount}} with {{.stepCount}} steps{{end}}",
        WorkflowUpdated => "Workflow {{.name}} successfully updated{{if .stepCount}} with {{.stepCount}} steps{{end}}",
        WorkflowDeleted => "Workflow {{.name}} successfully deleted from scope {{.scope}}",
        WorkflowValidationFailed => "Workflow {{.name}} validation failed{{if .error}}: {{.error}}{{end}}",
        WorkflowExecutionStarted => "Workflow {{.name}} execution started{{if .executionId}} (execution: {{.executionId}}){{end}}",
        WorkflowExecutionCompleted => "Workflow {{.name}} execution completed successfully{{if .stepCount}} ({{.stepCount}} steps){{end}}{{if .duration}} in {{.duration}}{{end}}",
        WorkflowExecutionFailed => "Workflow {{.name}} execution failed{{if .stepId}} at step {{.stepId}}{{end}}{{if .error}}: {{.error}}{{end}}",
        WorkflowExecutionTracked => "Workflow {{.name}} execution state persisted{{if .executionId}} (execution: {{.executionId}}){{end}}",
        WorkflowStepStarted => "Workflow {{.name}} step {{.stepId}} started (tool: {{.stepTool}})",
        WorkflowStepCompleted => "Workflow {{.name}} step {{.stepId}} completed successfully",
        WorkflowStepFailed => "Workflow {{.name}} step {{.stepId}} failed{{if .allowFailure}} (allow_failure=true, continuing){{end}}{{if .error}}: {{.error}}{{end}}",
        WorkflowStepSkipped => "Workflow {{.name}} step {{.stepId}} skipped{{if .detail}}: {{.detail}}{{end}}",
    }
}

/// Message templates keyed by reason, parsed once.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<ReasonCode, Template>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let mut templates = HashMap::new();
        for reason in ReasonCode::ALL {
            match Template::parse(default_template(*reason)) {
                Ok(t) => {
                    templates.insert(*reason, t);
                }
                Err(e) => warn!(reason = %reason, error = %e, "Invalid default event template"),
            }
        }
        Self { templates }
    }
}

impl MessageCatalog {
    /// A catalog with no templates; every reason uses the fallback message.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Override the template for `reason`.
    pub fn set(&mut self, reason: ReasonCode, template: &str) -> Result<(), TemplateError> {
        self.templates.insert(reason, Template::parse(template)?);
        Ok(())
    }

    /// Drop the template for `reason` so it renders the fallback.
    pub fn remove(&mut self, reason: ReasonCode) {
        self.templates.remove(&reason);
    }

    /// Render the message for `reason`. Missing fields render empty.
    pub fn render(&self, reason: ReasonCode, data: &EventData) -> String {
        let Some(template) = self.templates.get(&reason) else {
            return fallback_message(reason, data);
        };
        template
            .render_string(&data.to_context(), RenderMode::Lenient)
            .unwrap_or_else(|_| fallback_message(reason, data))
    }
}

/// Message used when a reason has no template.
pub fn fallback_message(reason: ReasonCode, data: &EventData) -> String {
    format!("Event: {} for {}/{}", reason, data.scope, data.name)
}
