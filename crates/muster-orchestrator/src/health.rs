//! Periodic health checks and the Running ⇄ Unhealthy transitions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use muster_events::ReasonCode;
use muster_template::explain;
use muster_types::{MusterError, Result, ServiceState};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::context::service_context;
use crate::invoke::{CallSite, call_tool};
use crate::orchestrator::{Inner, InstanceEntry, instance_event};
use crate::settings::ClassPolicy;

/// Floor for a monitor's tick period.
const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(100);

/// What one verdict did to the instance.
enum HealthChange {
    None,
    FirstHealthy,
    CheckFailed,
    BecameUnhealthy,
    Recovered,
}

impl Inner {
    /// Start (or replace) the health monitor of `entry`.
    ///
    /// The task only holds weak references, so dropping the orchestrator or
    /// the entry ends it on the next tick.
    pub(crate) fn spawn_monitor(self: &Arc<Self>, entry: &Arc<InstanceEntry>, interval: Duration) {
        let token = self.shutdown.child_token();
        if let Some(previous) = entry.monitor.lock().replace(token.clone()) {
            previous.cancel();
        }
        let period = interval.max(MIN_HEALTH_INTERVAL);
        let name = entry.snapshot().name;
        let inner = Arc::downgrade(self);
        let entry = Arc::downgrade(entry);
        debug!(instance = %name, interval_ms = period.as_millis() as u64, "Starting health monitor");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let (Some(inner), Some(entry)) = (inner.upgrade(), entry.upgrade()) else {
                            break;
                        };
                        if let Err(e) = inner.health_tick(&entry).await {
                            warn!(instance = %name, error = %e, "Health check could not run");
                        }
                    }
                }
            }
            debug!(instance = %name, "Health monitor stopped");
        });
    }

    /// One health check.
    ///
    /// Returns `Ok(None)` when skipped: another operation holds the lock, the
    /// instance is not up, infrastructure backoff is in effect, or the class
    /// has no health check tool.
    pub(crate) async fn health_tick(&self, entry: &InstanceEntry) -> Result<Option<bool>> {
        let Ok(_guard) = entry.op_lock.try_lock() else {
            debug!("Health check skipped, operation in progress");
            return Ok(None);
        };
        let snapshot = entry.snapshot();
        if !snapshot.state.is_up() {
            return Ok(None);
        }
        if !snapshot.backoff.ready(Utc::now()) {
            debug!(instance = %snapshot.name, "Health check skipped, backing off");
            return Ok(None);
        }
        let class = self.resolve_class(entry, true).await?;
        let Some(check) = class.tools().health_check.clone() else {
            return Ok(None);
        };
        let policy = ClassPolicy::resolve(&class, &self.settings)?;

        let site = CallSite {
            subject: &snapshot.name,
            operation: "health check",
            tool: &check.call.tool,
            timeout: policy.health_check_timeout,
        };
        let verdict = match service_context(&snapshot).resolve_args(&check.call.args) {
            Err(e) => Err(e.for_subject(&snapshot.name).to_string()),
            Ok(args) => match call_tool(self.invoker.as_ref(), site, Value::Object(args), &self.shutdown).await {
                Ok(result) => {
                    entry.update(|i| i.backoff.reset());
                    explain(&result, check.expect.as_ref(), check.expect_not.as_ref()).map_err(|detail| {
                        MusterError::ExpectationNotMet {
                            subject: snapshot.name.clone(),
                            operation: "health check".into(),
                            detail,
                        }
                        .to_string()
                    })
                }
                Err(failure) if failure.error.is_cancelled() => return Ok(None),
                Err(failure) => {
                    if failure.infrastructure {
                        entry.update(|i| {
                            self.settings.backoff.record_failure(&mut i.backoff, Utc::now());
                        });
                    }
                    Err(failure.error.to_string())
                }
            },
        };

        let healthy = verdict.is_ok();
        self.apply_verdict(entry, &policy, verdict);
        Ok(Some(healthy))
    }

    fn apply_verdict(&self, entry: &InstanceEntry, policy: &ClassPolicy, verdict: std::result::Result<(), String>) {
        let now = Utc::now();
        let (snapshot, change) = entry.update(|i| {
            let first_check = i.health.last_check.is_none();
            i.health.last_check = Some(now);
            let change = match &verdict {
                Ok(()) => {
                    i.health.consecutive_successes = i.health.consecutive_successes.saturating_add(1);
                    i.health.consecutive_failures = 0;
                    if i.state == ServiceState::Unhealthy
                        && i.health.consecutive_successes >= policy.success_threshold
                        && i.transition(ServiceState::Running).is_ok()
                    {
                        i.last_error = None;
                        HealthChange::Recovered
                    } else if first_check {
                        HealthChange::FirstHealthy
                    } else {
                        HealthChange::None
                    }
                }
                Err(message) => {
                    i.health.consecutive_failures = i.health.consecutive_failures.saturating_add(1);
                    i.health.consecutive_successes = 0;
                    i.last_error = Some(message.clone());
                    if i.state == ServiceState::Running
                        && i.health.consecutive_failures >= policy.failure_threshold
                        && i.transition(ServiceState::Unhealthy).is_ok()
                    {
                        HealthChange::BecameUnhealthy
                    } else {
                        HealthChange::CheckFailed
                    }
                }
            };
            (i.clone(), change)
        });

        let data = instance_event(&snapshot);
        match change {
            HealthChange::None => {}
            HealthChange::FirstHealthy => {
                debug!(instance = %snapshot.name, "Service instance healthy");
                self.events
                    .emit(ReasonCode::ServiceInstanceHealthy, data.count(snapshot.health.consecutive_successes));
            }
            HealthChange::CheckFailed => {
                let error = verdict.err().unwrap_or_default();
                debug!(
                    instance = %snapshot.name,
                    failures = snapshot.health.consecutive_failures,
                    error = %error,
                    "Health check failed"
                );
                self.events.emit(
                    ReasonCode::ServiceInstanceHealthCheckFailed,
                    data.error(error).count(snapshot.health.consecutive_failures),
                );
            }
            HealthChange::BecameUnhealthy => {
                let error = verdict.err().unwrap_or_default();
                warn!(
                    instance = %snapshot.name,
                    failures = snapshot.health.consecutive_failures,
                    error = %error,
                    "Service instance unhealthy"
                );
                self.events.emit(
                    ReasonCode::ServiceInstanceHealthCheckFailed,
                    data.clone().error(&error).count(snapshot.health.consecutive_failures),
                );
                self.events.emit(
                    ReasonCode::ServiceInstanceUnhealthy,
                    data.error(error).count(snapshot.health.consecutive_failures),
                );
            }
            HealthChange::Recovered => {
                info!(instance = %snapshot.name, "Service instance recovered");
                self.events.emit(
                    ReasonCode::ServiceInstanceHealthCheckRecovered,
                    data.count(snapshot.health.consecutive_successes),
                );
            }
        }
    }
}
