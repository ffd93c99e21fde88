//! Integration tests for the MCP client and aggregator against the mock server.

use std::time::Duration;

use muster_config::McpServerEntry;
use muster_mcp::{McpAggregator, McpClient, McpError};
use muster_types::{ToolError, ToolInvoker};
use serde_json::json;

fn mock_entry(name: &str) -> McpServerEntry {
    McpServerEntry::new(name, env!("CARGO_BIN_EXE_mock-mcp-server"))
}

#[test]
fn test_connect_and_initialize() {
    let mut client = McpClient::connect(&mock_entry("mock")).expect("Failed to connect");
    let info = client.initialize().expect("Failed to initialize");
    assert_eq!(info.name, "mock-mcp-server");
    assert_eq!(info.version, "1.0.0");
    assert!(client.is_initialized());
}

#[test]
fn test_list_tools() {
    let mut client = McpClient::connect(&mock_entry("mock")).unwrap();
    client.initialize().unwrap();

    let tools = client.list_tools().unwrap();
    assert_eq!(tools.len(), 6);
    let echo = tools.iter().find(|t| t.name == "echo").expect("echo tool not found");
    assert_eq!(echo.description.as_deref(), Some("Echo back the input"));
}

#[test]
fn test_list_tools_follows_cursor() {
    let entry = mock_entry("mock").with_arg("--page-size").with_arg("4");
    let mut client = McpClient::connect(&entry).unwrap();
    client.initialize().unwrap();
    assert_eq!(client.list_tools().unwrap().len(), 6);
}

#[test]
fn test_call_tool_results() {
    let mut client = McpClient::connect(&mock_entry("mock")).unwrap();
    client.initialize().unwrap();

    let echoed = client.call_tool("echo", Some(json!({"message": "hello"}))).unwrap();
    assert_eq!(echoed.text().as_deref(), Some("hello"));

    let created = client.call_tool("create", Some(json!({"name": "demo"}))).unwrap();
    let result = created.into_tool_result();
    assert!(result.is_success());
    assert_eq!(result.content, json!({"status": "ok", "name": "demo"}));

    let failed = client.call_tool("mock_fail", None).unwrap();
    assert!(failed.is_error());

    match client.call_tool("nope", None) {
        Err(McpError::Rpc { code, .. }) => assert_eq!(code, -32602),
        other => panic!("expected server error, got {:?}", other.map(|r| r.text())),
    }
}

#[test]
fn test_crash_closes_connection() {
    let mut client = McpClient::connect(&mock_entry("mock")).unwrap();
    client.initialize().unwrap();

    let err = client.call_tool("crash", None).unwrap_err();
    assert!(err.is_connectivity(), "unexpected error: {err}");
    std::thread::sleep(Duration::from_millis(100));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_aggregator_exposes_prefixed_tools() {
    let agg = McpAggregator::with_servers([mock_entry("mock")]);
    assert_eq!(agg.connect_all().await, 1);

    let names = agg.available_tool_names();
    assert!(names.contains("x_mock_echo"));
    assert!(names.contains("x_mock_create"));
    // Already carries the prefix, so it is not doubled.
    assert!(names.contains("x_mock_fail"));
    assert!(!names.contains("x_mock_mock_fail"));

    let result = agg.execute("x_mock_create", json!({"name": "demo"})).await.unwrap();
    assert_eq!(result.content["status"], "ok");

    let status = agg.execute("x_mock_status", json!({})).await.unwrap();
    assert_eq!(status.content, json!({"state": "up"}));

    let failed = agg.execute("x_mock_fail", json!({})).await.unwrap();
    assert!(!failed.is_success());

    agg.shutdown().await;
    assert!(agg.available_tool_names().is_empty());
}

#[tokio::test]
async fn test_aggregator_tool_prefix_override() {
    let agg = McpAggregator::with_servers([mock_entry("mock").with_tool_prefix("k8s")]);
    agg.connect_all().await;
    assert!(agg.available_tool_names().contains("x_k8s_echo"));
    agg.shutdown().await;
}

#[tokio::test]
async fn test_aggregator_crash_makes_tools_unavailable() {
    let agg = McpAggregator::with_servers([mock_entry("mock")]);
    agg.connect_all().await;
    let mut changes = agg.subscribe();

    let err = agg.execute("x_mock_crash", json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::Unreachable { .. }));
    assert!(err.is_infrastructure());
    assert!(changes.has_changed().unwrap());
    assert!(!agg.is_available("x_mock_echo"));

    // The next refresh reconnects.
    assert_eq!(agg.refresh().await, 1);
    assert!(agg.is_available("x_mock_echo"));
    agg.shutdown().await;
}
