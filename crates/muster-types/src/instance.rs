//! Runtime service instance records and the lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MusterError, Result};

/// Lifecycle state of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Pending,
    Starting,
    Running,
    Unhealthy,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Unhealthy)
                | (Running, Stopping)
                | (Running, Failed)
                | (Running, Starting)
                | (Unhealthy, Running)
                | (Unhealthy, Stopping)
                | (Unhealthy, Failed)
                | (Unhealthy, Starting)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Starting)
                | (Failed, Starting)
                | (Failed, Stopping)
        )
    }

    /// Running or Unhealthy: the instance exists on the remote side.
    pub fn is_up(self) -> bool {
        matches!(self, Self::Running | Self::Unhealthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical health counters driven by the health check policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCounters {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Infrastructure reachability backoff, kept apart from [`HealthCounters`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackoffStatus {
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_after: Option<DateTime<Utc>>,
}

impl BackoffStatus {
    /// Whether a retry is allowed at `now`.
    pub fn ready(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_after.is_none_or(|t| now >= t)
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.next_retry_after = None;
    }
}

/// One running (or transitioning) realization of a service class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub name: String,
    pub scope: String,
    pub service_class_name: String,
    pub state: ServiceState,
    /// Creation arguments after schema defaults were applied.
    pub args: Map<String, Value>,
    /// Bound start outputs plus resolved output templates.
    pub outputs: Map<String, Value>,
    pub health: HealthCounters,
    pub backoff: BackoffStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub restart_count: u32,
    /// Whether the operator wants this instance running; cleared by stop.
    pub desired_running: bool,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// Create a new instance in `Pending`.
    pub fn new(
        scope: impl Into<String>,
        name: impl Into<String>,
        service_class_name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            scope: scope.into(),
            service_class_name: service_class_name.into(),
            state: ServiceState::Pending,
            args,
            outputs: Map::new(),
            health: HealthCounters::default(),
            backoff: BackoffStatus::default(),
            last_error: None,
            restart_count: 0,
            desired_running: true,
            created_at: now,
            last_transition_at: now,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: ServiceState) -> Result<ServiceState> {
        if !self.state.can_transition_to(next) {
            return Err(MusterError::InvalidTransition {
                instance: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        let prev = self.state;
        self.state = next;
        self.last_transition_at = Utc::now();
        Ok(prev)
    }

    /// Put back a previously committed state after an aborted operation.
    pub fn restore(&mut self, state: ServiceState) {
        self.state = state;
        self.last_transition_at = Utc::now();
    }

    /// Record a failure and move to `Failed`.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.state = ServiceState::Failed;
        self.last_transition_at = Utc::now();
    }
}
