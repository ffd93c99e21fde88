//! Background recovery of instances that failed on unreachable infrastructure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use muster_events::ReasonCode;
use muster_types::{Result, ServiceInstance, ServiceState};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::{InstanceEntry, Orchestrator, instance_event};

/// Failed, still wanted, failed for infrastructure reasons and past its
/// backoff deadline.
fn wants_recovery(instance: &ServiceInstance, now: DateTime<Utc>) -> bool {
    instance.state == ServiceState::Failed
        && instance.desired_running
        && instance.backoff.consecutive_failures > 0
        && instance.backoff.ready(now)
}

impl Orchestrator {
    /// Refresh class availability and retry recoverable instances every
    /// `recovery_interval` until `cancel` fires.
    pub async fn run_recovery(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.settings.recovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.inner.settings.recovery_interval.as_secs(),
            "Recovery loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.refresh_availability().await;
                    let recovered = self.recover_once(&cancel).await;
                    if recovered > 0 {
                        info!(recovered, "Recovered service instances");
                    }
                }
            }
        }
        debug!("Recovery loop stopped");
    }

    /// One recovery pass. Returns how many instances are running again.
    ///
    /// Instances whose start failed for a logical reason (a tool-reported
    /// error, a template or expectation failure) are never retried here.
    pub async fn recover_once(&self, cancel: &CancellationToken) -> usize {
        let now = Utc::now();
        let candidates: Vec<Arc<InstanceEntry>> = self
            .inner
            .instances
            .read()
            .values()
            .filter(|e| wants_recovery(&e.record.lock(), now))
            .cloned()
            .collect();

        let mut recovered = 0;
        for entry in candidates {
            let Ok(_guard) = entry.op_lock.try_lock() else {
                continue;
            };
            let snapshot = entry.snapshot();
            if !wants_recovery(&snapshot, Utc::now()) {
                continue;
            }
            info!(
                instance = %snapshot.name,
                attempt = snapshot.backoff.consecutive_failures,
                "Attempting recovery"
            );
            self.inner.events.emit(
                ReasonCode::ServiceInstanceRecoveryStarted,
                instance_event(&snapshot).count(snapshot.backoff.consecutive_failures),
            );

            match self.recover_entry(&entry, &snapshot, cancel).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    warn!(instance = %snapshot.name, error = %e, "Recovery attempt failed");
                    self.inner.events.emit(
                        ReasonCode::ServiceInstanceRecoveryFailed,
                        instance_event(&entry.snapshot()).error(&e),
                    );
                }
            }
        }
        recovered
    }

    async fn recover_entry(
        &self,
        entry: &Arc<InstanceEntry>,
        snapshot: &ServiceInstance,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let class = self.inner.resolve_class(entry, false).await?;
        if let Err(e) = self
            .inner
            .gate(&snapshot.scope, &class, &snapshot.name, "recover")
            .await
        {
            // Still unreachable: wait longer before the next attempt
            entry.update(|i| {
                self.inner.settings.backoff.record_failure(&mut i.backoff, Utc::now());
            });
            return Err(e);
        }
        self.inner.start_locked(entry, &class, cancel).await
    }
}
