//! Orchestrator lifecycle tests against a scripted tool invoker.

use std::sync::Arc;
use std::time::Duration;

use muster_events::{EventEmitter, MemorySink, ReasonCode};
use muster_orchestrator::{BackoffPolicy, CreateInstance, Orchestrator, OrchestratorSettings};
use muster_store::MemoryStore;
use muster_types::{
    Expectation, HealthCheckToolCall, MusterError, ServiceClassDefinition, ServiceState, StubInvoker, ToolCall,
    ToolError, ToolResult,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const SCOPE: &str = "default";

struct Harness {
    orchestrator: Orchestrator,
    stub: Arc<StubInvoker>,
    sink: Arc<MemorySink>,
}

fn harness(tools: &[&str]) -> Harness {
    let stub = Arc::new(StubInvoker::with_tools(tools.iter().copied()));
    let sink = Arc::new(MemorySink::new());
    let settings = OrchestratorSettings {
        backoff: BackoffPolicy {
            base: Duration::ZERO,
            max: Duration::ZERO,
            cap: 6,
        },
        ..OrchestratorSettings::default()
    };
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryStore::new()),
        stub.clone(),
        EventEmitter::new(sink.clone()),
        settings,
    );
    Harness { orchestrator, stub, sink }
}

fn pf_class() -> ServiceClassDefinition {
    let mut start = ToolCall::new("x_pf_start");
    start.args.insert("port".into(), json!("{{ .port }}"));
    start.outputs.insert("session.id".into(), "sessionId".into());
    let mut stop = ToolCall::new("x_pf_stop");
    stop.args.insert("session".into(), json!("{{ .sessionId }}"));
    ServiceClassDefinition::new("pf", start, stop)
}

fn pf_with_health(failure_threshold: u32, success_threshold: u32, interval: &str) -> ServiceClassDefinition {
    let mut class = pf_class();
    class.service_config.lifecycle_tools.health_check = Some(HealthCheckToolCall {
        call: ToolCall::new("x_pf_status"),
        expect: Some(Expectation::default().with_field("state", "up")),
        expect_not: None,
    });
    let policy = &mut class.service_config.health_check_policy;
    policy.enabled = true;
    policy.interval = Some(interval.to_string());
    policy.failure_threshold = Some(failure_threshold);
    policy.success_threshold = Some(success_threshold);
    class
}

fn simple_class(name: &str, deps: &[&str]) -> ServiceClassDefinition {
    let mut class = ServiceClassDefinition::new(
        name,
        ToolCall::new(format!("x_{}_start", name)),
        ToolCall::new(format!("x_{}_stop", name)),
    );
    class.service_config.dependencies = deps.iter().map(|d| d.to_string()).collect();
    class
}

async fn create_pf(h: &Harness) -> Result<muster_types::ServiceInstance, MusterError> {
    h.orchestrator
        .create_instance(
            CreateInstance::new("pf").with_name("pf-1").with_arg("port", 8080),
            &CancellationToken::new(),
        )
        .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Create / stop / delete
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_binds_outputs_and_stop_uses_them() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    h.stub
        .push_response("x_pf_start", Ok(ToolResult::ok(json!({"session": {"id": "s-1"}}))));

    let instance = create_pf(&h).await.unwrap();
    assert_eq!(instance.state, ServiceState::Running);
    assert_eq!(instance.outputs["sessionId"], json!("s-1"));
    assert_eq!(h.stub.calls_to("x_pf_start")[0]["port"], json!(8080));

    let cancel = CancellationToken::new();
    let stopped = h.orchestrator.stop_instance(SCOPE, "pf-1", &cancel).await.unwrap();
    assert_eq!(stopped.state, ServiceState::Stopped);
    assert!(!stopped.desired_running);
    assert_eq!(h.stub.calls_to("x_pf_stop"), vec![json!({"session": "s-1"})]);

    // Stopping again is a no-op
    h.orchestrator.stop_instance(SCOPE, "pf-1", &cancel).await.unwrap();
    assert_eq!(h.stub.call_count("x_pf_stop"), 1);

    assert_eq!(
        h.sink.reasons(),
        vec![
            ReasonCode::ServiceClassCreated,
            ReasonCode::ServiceInstanceCreated,
            ReasonCode::ServiceInstanceStarting,
            ReasonCode::ServiceInstanceStarted,
            ReasonCode::ServiceInstanceStopping,
            ReasonCode::ServiceInstanceStopped,
        ]
    );
}

#[tokio::test]
async fn test_duplicate_instance_rejected() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    create_pf(&h).await.unwrap();

    let err = create_pf(&h).await.unwrap_err();
    assert!(matches!(err, MusterError::InstanceAlreadyExists { .. }));
    assert_eq!(h.stub.call_count("x_pf_start"), 1);
}

#[tokio::test]
async fn test_generated_instance_name() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    let instance = h
        .orchestrator
        .create_instance(CreateInstance::new("pf").with_arg("port", 1), &CancellationToken::new())
        .await
        .unwrap();
    assert!(instance.name.starts_with("pf-"));
    assert_eq!(h.orchestrator.list_instances(Some(SCOPE)).len(), 1);
    assert!(h.orchestrator.list_instances(Some("other")).is_empty());
}

#[tokio::test]
async fn test_delete_removes_record_even_when_stop_fails() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    create_pf(&h).await.unwrap();
    h.stub.set_response("x_pf_stop", Ok(ToolResult::error("session busy")));

    let err = h
        .orchestrator
        .delete_instance(SCOPE, "pf-1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("session busy"));
    assert!(matches!(
        h.orchestrator.get_instance(SCOPE, "pf-1"),
        Err(MusterError::InstanceNotFound { .. })
    ));
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceInstanceDeleted).len(), 1);
}

#[tokio::test]
async fn test_stopped_instance_survives_class_deletion() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    create_pf(&h).await.unwrap();
    h.orchestrator.delete_class(SCOPE, "pf").await.unwrap();

    let cancel = CancellationToken::new();
    let stopped = h.orchestrator.stop_instance(SCOPE, "pf-1", &cancel).await.unwrap();
    assert_eq!(stopped.state, ServiceState::Stopped);

    // Starting needs the class
    let err = h.orchestrator.start_instance(SCOPE, "pf-1", &cancel).await.unwrap_err();
    assert!(matches!(err, MusterError::DefinitionNotFound { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Dependency gating
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gate_blocks_before_any_tool_call() {
    // db's stop tool is missing
    let h = harness(&["x_api_start", "x_api_stop", "x_db_start"]);
    h.orchestrator.create_class(SCOPE, simple_class("db", &[])).await.unwrap();
    h.orchestrator.create_class(SCOPE, simple_class("api", &["db"])).await.unwrap();

    let err = h
        .orchestrator
        .create_instance(CreateInstance::new("api").with_name("api-1"), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        MusterError::DependencyUnavailable {
            class,
            unmet,
            missing_tools,
            ..
        } => {
            assert_eq!(class, "api");
            assert_eq!(unmet, "db");
            assert_eq!(missing_tools, vec!["x_db_stop".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.stub.calls().is_empty());
    assert!(h.orchestrator.list_instances(None).is_empty());

    assert!(!h.orchestrator.is_available(SCOPE, "api").await.unwrap());
    h.stub.add_tool("x_db_stop");
    assert!(h.orchestrator.is_available(SCOPE, "api").await.unwrap());
    assert!(!h.orchestrator.is_available(SCOPE, "missing").await.unwrap());
}

#[tokio::test]
async fn test_availability_report_and_events() {
    let h = harness(&["x_db_start"]);
    h.orchestrator.create_class(SCOPE, simple_class("db", &[])).await.unwrap();
    h.orchestrator.create_class(SCOPE, simple_class("api", &["db"])).await.unwrap();

    let report = h.orchestrator.availability_report(SCOPE).await.unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report[0].name, "api");
    assert_eq!(report[0].missing_tools, vec!["x_api_start", "x_api_stop"]);
    assert_eq!(report[1].missing_tools, vec!["x_db_stop"]);

    h.orchestrator.refresh_availability().await;
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceClassUnavailable).len(), 2);

    for tool in ["x_db_stop", "x_api_start", "x_api_stop"] {
        h.stub.add_tool(tool);
    }
    h.orchestrator.refresh_availability().await;
    h.orchestrator.refresh_availability().await;
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceClassAvailable).len(), 2);
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceClassUnavailable).len(), 2);
}

#[tokio::test]
async fn test_invalid_class_emits_validation_failed() {
    let h = harness(&[]);
    let class = ServiceClassDefinition::new("broken", ToolCall::new("x_start"), ToolCall::new(""));
    let err = h.orchestrator.create_class(SCOPE, class).await.unwrap_err();
    assert!(matches!(err, MusterError::DefinitionInvalid { .. }));
    assert_eq!(h.sink.reasons(), vec![ReasonCode::ServiceClassValidationFailed]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures, backoff and recovery
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tool_reported_failure_is_not_retried() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    h.stub.set_response("x_pf_start", Ok(ToolResult::error("port in use")));

    let err = create_pf(&h).await.unwrap_err();
    assert!(matches!(err, MusterError::ToolInvocationFailed { .. }));

    let instance = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(instance.state, ServiceState::Failed);
    assert!(instance.last_error.unwrap().contains("port in use"));
    assert_eq!(instance.backoff.consecutive_failures, 0);

    assert_eq!(h.orchestrator.recover_once(&CancellationToken::new()).await, 0);
    assert_eq!(h.stub.call_count("x_pf_start"), 1);
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceInstanceFailed).len(), 1);
}

#[tokio::test]
async fn test_unreachable_start_backs_off_then_recovers() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    h.stub.push_response(
        "x_pf_start",
        Err(ToolError::Unreachable {
            tool: "x_pf_start".into(),
            message: "connection refused".into(),
        }),
    );

    create_pf(&h).await.unwrap_err();
    let failed = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(failed.state, ServiceState::Failed);
    assert_eq!(failed.backoff.consecutive_failures, 1);
    assert!(failed.desired_running);

    assert_eq!(h.orchestrator.recover_once(&CancellationToken::new()).await, 1);
    let running = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(running.state, ServiceState::Running);
    assert_eq!(running.backoff.consecutive_failures, 0);
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceInstanceRecoveryStarted).len(), 1);
}

#[tokio::test]
async fn test_recovery_waits_while_tools_are_gone() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    h.stub
        .push_response("x_pf_start", Err(ToolError::NotFound("x_pf_start".into())));
    create_pf(&h).await.unwrap_err();

    h.stub.remove_tool("x_pf_start");
    assert_eq!(h.orchestrator.recover_once(&CancellationToken::new()).await, 0);
    assert_eq!(h.stub.call_count("x_pf_start"), 1);
    let instance = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(instance.backoff.consecutive_failures, 2);
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceInstanceRecoveryFailed).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_fails_instance() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    let mut class = pf_class();
    class.service_config.timeout_policy.create = Some("2s".into());
    h.orchestrator.create_class(SCOPE, class).await.unwrap();
    h.stub.set_delay("x_pf_start", Duration::from_secs(60));

    let err = create_pf(&h).await.unwrap_err();
    assert!(err.is_timeout());
    let instance = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(instance.state, ServiceState::Failed);
    assert_eq!(instance.backoff.consecutive_failures, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Serialization and cancellation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cancelled_stop_restores_running() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    create_pf(&h).await.unwrap();
    h.stub.set_delay("x_pf_stop", Duration::from_secs(10));

    let cancel = CancellationToken::new();
    let task = {
        let orchestrator = h.orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.stop_instance(SCOPE, "pf-1", &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.orchestrator.get_instance(SCOPE, "pf-1").unwrap().state,
        ServiceState::Stopping
    );
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    let instance = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(instance.state, ServiceState::Running);
    assert!(instance.desired_running);
}

#[tokio::test(start_paused = true)]
async fn test_operations_on_one_instance_are_serialized() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    create_pf(&h).await.unwrap();
    h.stub.set_delay("x_pf_stop", Duration::from_secs(5));

    let stop = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .stop_instance(SCOPE, "pf-1", &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let start = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .start_instance(SCOPE, "pf-1", &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    // The start waits for the stop; a health check does not wait at all
    assert_eq!(
        h.orchestrator.get_instance(SCOPE, "pf-1").unwrap().state,
        ServiceState::Stopping
    );
    assert_eq!(h.orchestrator.check_health(SCOPE, "pf-1").await.unwrap(), None);

    stop.await.unwrap().unwrap();
    let instance = start.await.unwrap().unwrap();
    assert_eq!(instance.state, ServiceState::Running);

    let order: Vec<String> = h.stub.calls().into_iter().map(|(tool, _)| tool).collect();
    assert_eq!(order, vec!["x_pf_start", "x_pf_stop", "x_pf_start"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Restart
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_without_tool_stops_then_starts() {
    let h = harness(&["x_pf_start", "x_pf_stop"]);
    h.orchestrator.create_class(SCOPE, pf_class()).await.unwrap();
    create_pf(&h).await.unwrap();

    let instance = h
        .orchestrator
        .restart_instance(SCOPE, "pf-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(instance.state, ServiceState::Running);
    assert_eq!(instance.restart_count, 1);
    assert!(instance.desired_running);

    let order: Vec<String> = h.stub.calls().into_iter().map(|(tool, _)| tool).collect();
    assert_eq!(order, vec!["x_pf_start", "x_pf_stop", "x_pf_start"]);
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceInstanceRestarted).len(), 1);
}

#[tokio::test]
async fn test_restart_with_tool() {
    let h = harness(&["x_pf_start", "x_pf_stop", "x_pf_restart"]);
    let mut class = pf_class();
    class.service_config.lifecycle_tools.restart = Some(ToolCall::new("x_pf_restart"));
    h.orchestrator.create_class(SCOPE, class).await.unwrap();
    h.stub
        .push_response("x_pf_start", Ok(ToolResult::ok(json!({"session": {"id": "s-1"}}))));
    create_pf(&h).await.unwrap();

    let instance = h
        .orchestrator
        .restart_instance(SCOPE, "pf-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(instance.restart_count, 1);
    assert_eq!(instance.outputs["sessionId"], json!("s-1"));
    assert_eq!(h.stub.call_count("x_pf_restart"), 1);
    assert_eq!(h.stub.call_count("x_pf_stop"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_thresholds_are_exact() {
    let h = harness(&["x_pf_start", "x_pf_stop", "x_pf_status"]);
    h.orchestrator
        .create_class(SCOPE, pf_with_health(2, 2, "1h"))
        .await
        .unwrap();
    create_pf(&h).await.unwrap();
    let state = || h.orchestrator.get_instance(SCOPE, "pf-1").unwrap().state;

    h.stub
        .set_response("x_pf_status", Ok(ToolResult::ok(json!({"state": "down"}))));
    assert_eq!(h.orchestrator.check_health(SCOPE, "pf-1").await.unwrap(), Some(false));
    assert_eq!(state(), ServiceState::Running);
    assert_eq!(h.orchestrator.check_health(SCOPE, "pf-1").await.unwrap(), Some(false));
    assert_eq!(state(), ServiceState::Unhealthy);
    assert_eq!(h.sink.with_reason(ReasonCode::ServiceInstanceUnhealthy).len(), 1);

    h.stub
        .set_response("x_pf_status", Ok(ToolResult::ok(json!({"state": "up"}))));
    assert_eq!(h.orchestrator.check_health(SCOPE, "pf-1").await.unwrap(), Some(true));
    assert_eq!(state(), ServiceState::Unhealthy);
    assert_eq!(h.orchestrator.check_health(SCOPE, "pf-1").await.unwrap(), Some(true));
    assert_eq!(state(), ServiceState::Running);
    assert_eq!(
        h.sink.with_reason(ReasonCode::ServiceInstanceHealthCheckRecovered).len(),
        1
    );

    // Logical failures never touch the infrastructure backoff
    let instance = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(instance.backoff.consecutive_failures, 0);
    assert_eq!(instance.health.consecutive_successes, 2);
}

#[tokio::test]
async fn test_unreachable_health_check_backs_off() {
    let h = harness(&["x_pf_start", "x_pf_stop", "x_pf_status"]);
    h.orchestrator
        .create_class(SCOPE, pf_with_health(3, 1, "1h"))
        .await
        .unwrap();
    create_pf(&h).await.unwrap();

    h.stub.push_response(
        "x_pf_status",
        Err(ToolError::Unreachable {
            tool: "x_pf_status".into(),
            message: "eof".into(),
        }),
    );
    assert_eq!(h.orchestrator.check_health(SCOPE, "pf-1").await.unwrap(), Some(false));
    let instance = h.orchestrator.get_instance(SCOPE, "pf-1").unwrap();
    assert_eq!(instance.backoff.consecutive_failures, 1);
    assert_eq!(instance.health.consecutive_failures, 1);
    assert_eq!(instance.state, ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_drives_health_until_stopped() {
    let h = harness(&["x_pf_start", "x_pf_stop", "x_pf_status"]);
    h.orchestrator
        .create_class(SCOPE, pf_with_health(1, 1, "10s"))
        .await
        .unwrap();
    h.stub
        .set_response("x_pf_status", Ok(ToolResult::ok(json!({"state": "down"}))));
    create_pf(&h).await.unwrap();
    assert_eq!(h.stub.call_count("x_pf_status"), 0);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(
        h.orchestrator.get_instance(SCOPE, "pf-1").unwrap().state,
        ServiceState::Unhealthy
    );
    assert_eq!(h.stub.call_count("x_pf_status"), 2);

    h.orchestrator
        .stop_instance(SCOPE, "pf-1", &CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.stub.call_count("x_pf_status"), 2);
}
