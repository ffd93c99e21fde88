//! Orchestrator defaults and per-class effective policy.

use std::time::Duration;

use muster_config::OrchestratorConfig;
use muster_types::{DefinitionKind, MusterError, Result, ServiceClassDefinition, parse_duration};

use crate::backoff::BackoffPolicy;

/// Defaults applied when a class leaves a policy field unset.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub health_interval: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub create_timeout: Duration,
    pub delete_timeout: Duration,
    pub health_check_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub recovery_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            health_interval: Duration::from_secs(config.health_interval_secs),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            create_timeout: Duration::from_secs(config.create_timeout_secs),
            delete_timeout: Duration::from_secs(config.delete_timeout_secs),
            health_check_timeout: Duration::from_secs(config.health_check_timeout_secs),
            backoff: BackoffPolicy {
                base: Duration::from_secs(config.backoff_base_secs),
                max: Duration::from_secs(config.backoff_max_secs),
                cap: config.backoff_cap,
            },
            recovery_interval: Duration::from_secs(config.recovery_interval_secs.max(1)),
        }
    }
}

/// A class's policies with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClassPolicy {
    /// Enabled in the class and a health check tool is declared.
    pub health_enabled: bool,
    pub health_interval: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub create_timeout: Duration,
    pub delete_timeout: Duration,
    pub health_check_timeout: Duration,
}

impl ClassPolicy {
    pub(crate) fn resolve(class: &ServiceClassDefinition, settings: &OrchestratorSettings) -> Result<Self> {
        let health = &class.service_config.health_check_policy;
        let timeouts = &class.service_config.timeout_policy;
        let parse = |value: Option<&String>, default: Duration| -> Result<Duration> {
            match value {
                Some(s) => parse_duration(s)
                    .map_err(|e| MusterError::invalid(DefinitionKind::ServiceClass, &class.name, e)),
                None => Ok(default),
            }
        };

        Ok(Self {
            health_enabled: health.enabled && class.tools().health_check.is_some(),
            health_interval: parse(health.interval.as_ref(), settings.health_interval)?,
            failure_threshold: health.failure_threshold.unwrap_or(settings.failure_threshold).max(1),
            success_threshold: health.success_threshold.unwrap_or(settings.success_threshold).max(1),
            create_timeout: parse(timeouts.create.as_ref(), settings.create_timeout)?,
            delete_timeout: parse(timeouts.delete.as_ref(), settings.delete_timeout)?,
            health_check_timeout: parse(timeouts.health_check.as_ref(), settings.health_check_timeout)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_types::{HealthCheckToolCall, ToolCall};

    #[test]
    fn test_settings_from_config() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.health_interval, Duration::from_secs(30));
        assert_eq!(settings.failure_threshold, 3);
        assert_eq!(settings.backoff.max, Duration::from_secs(1800));
    }

    #[test]
    fn test_class_policy_overrides_defaults() {
        let mut class = ServiceClassDefinition::new("db", ToolCall::new("x_start"), ToolCall::new("x_stop"));
        class.service_config.lifecycle_tools.health_check = Some(HealthCheckToolCall {
            call: ToolCall::new("x_health"),
            expect: None,
            expect_not: None,
        });
        class.service_config.health_check_policy.enabled = true;
        class.service_config.health_check_policy.interval = Some("5s".into());
        class.service_config.health_check_policy.failure_threshold = Some(2);
        class.service_config.timeout_policy.create = Some("500ms".into());

        let policy = ClassPolicy::resolve(&class, &OrchestratorSettings::default()).unwrap();
        assert!(policy.health_enabled);
        assert_eq!(policy.health_interval, Duration::from_secs(5));
        assert_eq!(policy.failure_threshold, 2);
        assert_eq!(policy.success_threshold, 1);
        assert_eq!(policy.create_timeout, Duration::from_millis(500));
        assert_eq!(policy.delete_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_health_disabled_without_tool() {
        let mut class = ServiceClassDefinition::new("db", ToolCall::new("x_start"), ToolCall::new("x_stop"));
        class.service_config.health_check_policy.enabled = true;
        let policy = ClassPolicy::resolve(&class, &OrchestratorSettings::default()).unwrap();
        assert!(!policy.health_enabled);
    }
}
