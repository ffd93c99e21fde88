//! Start, stop and restart, run with the instance's operation lock held.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use muster_events::ReasonCode;
use muster_template::{ExecutionContext, RenderMode, extract_outputs, result_payload};
use muster_types::{MusterError, Result, ServiceClassDefinition, ServiceState, ToolCall, ToolResult};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::service_context;
use crate::invoke::{CallFailure, CallSite, call_tool, reported_failure};
use crate::orchestrator::{Inner, InstanceEntry, instance_event};
use crate::settings::ClassPolicy;

impl Inner {
    pub(crate) async fn start_locked(
        self: &Arc<Self>,
        entry: &Arc<InstanceEntry>,
        class: &ServiceClassDefinition,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policy = ClassPolicy::resolve(class, &self.settings)?;
        let start = &class.tools().start;

        let (prev, was_desired, snapshot) = entry.update(|i| -> Result<_> {
            let prev = i.transition(ServiceState::Starting)?;
            let was_desired = i.desired_running;
            i.desired_running = true;
            Ok((prev, was_desired, i.clone()))
        })?;
        info!(instance = %snapshot.name, class = %class.name, tool = %start.tool, "Starting service instance");
        self.events.emit(
            ReasonCode::ServiceInstanceStarting,
            instance_event(&snapshot).tool(&start.tool),
        );
        let started = Instant::now();

        let site = CallSite {
            subject: &snapshot.name,
            operation: "start",
            tool: &start.tool,
            timeout: policy.create_timeout,
        };
        let ctx = service_context(&snapshot);
        let args = match ctx.resolve_args(&start.args) {
            Ok(args) => args,
            Err(e) => return Err(self.fail(entry, "start", e.for_subject(&snapshot.name))),
        };

        let result = match call_tool(self.invoker.as_ref(), site, Value::Object(args), cancel).await {
            Ok(result) => result,
            Err(failure) if failure.error.is_cancelled() => {
                entry.update(|i| {
                    i.restore(prev);
                    i.desired_running = was_desired;
                });
                debug!(instance = %snapshot.name, restored = %prev, "Start cancelled");
                return Err(failure.error);
            }
            Err(failure) => return Err(self.call_failed(entry, "start", failure)),
        };
        entry.update(|i| i.backoff.reset());
        if !result.is_success() {
            return Err(self.fail(entry, "start", reported_failure(site, &result)));
        }

        let outputs = match bind_outputs(&ctx, &result, start, &class.service_config.output_templates, &snapshot.name) {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(entry, "start", e)),
        };
        let snapshot = entry.update(|i| -> Result<_> {
            i.outputs = outputs;
            i.health = Default::default();
            i.last_error = None;
            i.transition(ServiceState::Running)?;
            Ok(i.clone())
        })?;

        info!(
            instance = %snapshot.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Service instance running"
        );
        self.events.emit(
            ReasonCode::ServiceInstanceStarted,
            instance_event(&snapshot).duration(started.elapsed()),
        );
        if policy.health_enabled {
            self.spawn_monitor(entry, policy.health_interval);
        }
        Ok(())
    }

    /// Stop through the class's stop tool. A stopped instance only has its
    /// desired state cleared.
    pub(crate) async fn stop_locked(
        self: &Arc<Self>,
        entry: &Arc<InstanceEntry>,
        class: &ServiceClassDefinition,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if entry.snapshot().state == ServiceState::Stopped {
            entry.update(|i| i.desired_running = false);
            return Ok(());
        }
        let policy = ClassPolicy::resolve(class, &self.settings)?;
        let stop = &class.tools().stop;

        let (prev, was_desired, snapshot) = entry.update(|i| -> Result<_> {
            let prev = i.transition(ServiceState::Stopping)?;
            let was_desired = i.desired_running;
            i.desired_running = false;
            Ok((prev, was_desired, i.clone()))
        })?;
        entry.stop_monitor();
        info!(instance = %snapshot.name, tool = %stop.tool, "Stopping service instance");
        self.events.emit(
            ReasonCode::ServiceInstanceStopping,
            instance_event(&snapshot).tool(&stop.tool),
        );

        let site = CallSite {
            subject: &snapshot.name,
            operation: "stop",
            tool: &stop.tool,
            timeout: policy.delete_timeout,
        };
        let args = match service_context(&snapshot).resolve_args(&stop.args) {
            Ok(args) => args,
            Err(e) => return Err(self.fail(entry, "stop", e.for_subject(&snapshot.name))),
        };

        let result = match call_tool(self.invoker.as_ref(), site, Value::Object(args), cancel).await {
            Ok(result) => result,
            Err(failure) if failure.error.is_cancelled() => {
                entry.update(|i| {
                    i.restore(prev);
                    i.desired_running = was_desired;
                });
                if prev.is_up() && policy.health_enabled {
                    self.spawn_monitor(entry, policy.health_interval);
                }
                debug!(instance = %snapshot.name, restored = %prev, "Stop cancelled");
                return Err(failure.error);
            }
            Err(failure) => return Err(self.call_failed(entry, "stop", failure)),
        };
        entry.update(|i| i.backoff.reset());
        if !result.is_success() {
            return Err(self.fail(entry, "stop", reported_failure(site, &result)));
        }

        let snapshot = entry.update(|i| -> Result<_> {
            i.transition(ServiceState::Stopped)?;
            i.last_error = None;
            Ok(i.clone())
        })?;
        info!(instance = %snapshot.name, "Service instance stopped");
        self.events
            .emit(ReasonCode::ServiceInstanceStopped, instance_event(&snapshot));
        Ok(())
    }

    pub(crate) async fn restart_locked(
        self: &Arc<Self>,
        entry: &Arc<InstanceEntry>,
        class: &ServiceClassDefinition,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policy = ClassPolicy::resolve(class, &self.settings)?;
        let started = Instant::now();
        let tools = class.tools();
        let announced = tools.restart.as_ref().unwrap_or(&tools.stop);
        self.events.emit(
            ReasonCode::ServiceInstanceRestarting,
            instance_event(&entry.snapshot()).tool(&announced.tool),
        );

        match &tools.restart {
            Some(restart) => self.restart_with_tool(entry, class, restart, &policy, cancel).await?,
            None => {
                debug!(instance = %entry.snapshot().name, "No restart tool, stopping then starting");
                self.stop_locked(entry, class, cancel).await?;
                self.start_locked(entry, class, cancel).await?;
            }
        }

        let snapshot = entry.update(|i| {
            i.restart_count = i.restart_count.saturating_add(1);
            i.clone()
        });
        info!(instance = %snapshot.name, restarts = snapshot.restart_count, "Service instance restarted");
        self.events.emit(
            ReasonCode::ServiceInstanceRestarted,
            instance_event(&snapshot)
                .duration(started.elapsed())
                .count(snapshot.restart_count),
        );
        Ok(())
    }

    async fn restart_with_tool(
        self: &Arc<Self>,
        entry: &Arc<InstanceEntry>,
        class: &ServiceClassDefinition,
        restart: &ToolCall,
        policy: &ClassPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (prev, was_desired, snapshot) = entry.update(|i| -> Result<_> {
            let prev = i.transition(ServiceState::Starting)?;
            let was_desired = i.desired_running;
            i.desired_running = true;
            Ok((prev, was_desired, i.clone()))
        })?;
        entry.stop_monitor();

        let site = CallSite {
            subject: &snapshot.name,
            operation: "restart",
            tool: &restart.tool,
            timeout: policy.create_timeout,
        };
        let ctx = service_context(&snapshot);
        let args = match ctx.resolve_args(&restart.args) {
            Ok(args) => args,
            Err(e) => return Err(self.fail(entry, "restart", e.for_subject(&snapshot.name))),
        };

        let result = match call_tool(self.invoker.as_ref(), site, Value::Object(args), cancel).await {
            Ok(result) => result,
            Err(failure) if failure.error.is_cancelled() => {
                entry.update(|i| {
                    i.restore(prev);
                    i.desired_running = was_desired;
                });
                if prev.is_up() && policy.health_enabled {
                    self.spawn_monitor(entry, policy.health_interval);
                }
                return Err(failure.error);
            }
            Err(failure) => return Err(self.call_failed(entry, "restart", failure)),
        };
        entry.update(|i| i.backoff.reset());
        if !result.is_success() {
            return Err(self.fail(entry, "restart", reported_failure(site, &result)));
        }

        let fresh = match bind_outputs(&ctx, &result, restart, &class.service_config.output_templates, &snapshot.name) {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(entry, "restart", e)),
        };
        entry.update(|i| -> Result<()> {
            i.outputs.extend(fresh);
            i.health = Default::default();
            i.last_error = None;
            i.transition(ServiceState::Running)?;
            Ok(())
        })?;
        if policy.health_enabled {
            self.spawn_monitor(entry, policy.health_interval);
        }
        Ok(())
    }

    /// Record a failed call: infrastructure failures also push back the
    /// next retry.
    fn call_failed(&self, entry: &InstanceEntry, operation: &str, failure: CallFailure) -> MusterError {
        if failure.infrastructure {
            let (name, delay, failures) = entry.update(|i| {
                let delay = self.settings.backoff.record_failure(&mut i.backoff, Utc::now());
                (i.name.clone(), delay, i.backoff.consecutive_failures)
            });
            warn!(
                instance = %name,
                failures,
                retry_in_secs = delay.as_secs(),
                "Tool infrastructure unreachable, backing off"
            );
        }
        self.fail(entry, operation, failure.error)
    }
}

/// Outputs bound from a lifecycle result, plus the class's output templates
/// evaluated against the service context, those outputs and the result.
fn bind_outputs(
    ctx: &ExecutionContext,
    result: &ToolResult,
    call: &ToolCall,
    templates: &BTreeMap<String, String>,
    subject: &str,
) -> Result<Map<String, Value>> {
    let mut outputs = extract_outputs(result, &call.outputs);
    if templates.is_empty() {
        return Ok(outputs);
    }

    let mut ctx = ctx.clone();
    ctx.extend(&outputs);
    ctx.insert("start", Value::Object(outputs.clone()));
    ctx.insert("result", result_payload(&result.content).into_owned());
    for (name, template) in templates {
        let value = ctx
            .resolve(&Value::String(template.clone()), RenderMode::Strict)
            .map_err(|e| e.for_subject(subject))?;
        outputs.insert(name.clone(), value);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_types::ServiceInstance;
    use serde_json::json;

    #[test]
    fn test_bind_outputs_with_templates() {
        let mut args = Map::new();
        args.insert("port".into(), json!(8080));
        let instance = ServiceInstance::new("default", "pf-1", "pf", args);
        let ctx = service_context(&instance);

        let mut call = ToolCall::new("x_start");
        call.outputs.insert("session.id".into(), "sessionId".into());
        let mut templates = BTreeMap::new();
        templates.insert("endpoint".into(), "localhost:{{ .port }}/{{ .sessionId }}".into());

        let result = ToolResult::ok(json!({"session": {"id": "s-9"}}));
        let outputs = bind_outputs(&ctx, &result, &call, &templates, "pf-1").unwrap();
        assert_eq!(outputs["sessionId"], json!("s-9"));
        assert_eq!(outputs["endpoint"], json!("localhost:8080/s-9"));
    }

    #[test]
    fn test_bind_outputs_unresolved_template() {
        let instance = ServiceInstance::new("default", "pf-1", "pf", Map::new());
        let mut templates = BTreeMap::new();
        templates.insert("endpoint".into(), "{{ .nope }}".into());
        let err = bind_outputs(
            &service_context(&instance),
            &ToolResult::ok(json!({})),
            &ToolCall::new("x_start"),
            &templates,
            "pf-1",
        )
        .unwrap_err();
        assert!(matches!(err, MusterError::TemplateResolutionFailed { .. }));
    }
}
