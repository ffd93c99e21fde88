//! Mock MCP server for integration testing.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout. Before every response it
//! emits a log notification so clients must skip unsolicited messages.
//!
//! Usage:
//!   mock-mcp-server [--crash-on TOOL] [--slow-tool TOOL:MS] [--page-size N]

use std::collections::HashMap;
use std::env;
use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<u64>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Default)]
struct ServerConfig {
    crash_on: Option<String>,
    slow_tools: HashMap<String, u64>,
    page_size: Option<usize>,
}

impl ServerConfig {
    fn from_args() -> Self {
        let mut config = Self::default();
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--crash-on" => config.crash_on = args.next(),
                "--slow-tool" => {
                    if let Some((tool, ms)) = args.next().as_deref().and_then(|s| s.split_once(':')) {
                        if let Ok(ms) = ms.parse() {
                            config.slow_tools.insert(tool.to_string(), ms);
                        }
                    }
                }
                "--page-size" => config.page_size = args.next().and_then(|n| n.parse().ok()),
                _ => {}
            }
        }
        config
    }
}

fn tool_list() -> Vec<Value> {
    vec![
        json!({"name": "echo", "description": "Echo back the input",
               "inputSchema": {"type": "object", "properties": {"message": {"type": "string"}}}}),
        json!({"name": "add", "description": "Add two numbers",
               "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}}),
        json!({"name": "create", "description": "Create a named resource"}),
        json!({"name": "status", "description": "Report resource status"}),
        json!({"name": "mock_fail", "description": "Always returns an error result"}),
        json!({"name": "crash", "description": "Exit without answering"}),
    ]
}

fn text(value: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": value.into()}]})
}

fn call_tool(config: &ServerConfig, params: &Value) -> Result<Value, Value> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    if config.crash_on.as_deref() == Some(name) || name == "crash" {
        std::process::exit(1);
    }
    if let Some(ms) = config.slow_tools.get(name) {
        thread::sleep(Duration::from_millis(*ms));
    }

    match name {
        "echo" => Ok(text(args.get("message").and_then(Value::as_str).unwrap_or_default())),
        "add" => {
            let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(text(format!("{}", a + b)))
        }
        "create" => {
            let name = args.get("name").and_then(Value::as_str).unwrap_or("unnamed");
            Ok(text(json!({"status": "ok", "name": name}).to_string()))
        }
        "status" => Ok(json!({
            "content": [{"type": "text", "text": "up"}],
            "structuredContent": {"state": "up"}
        })),
        "mock_fail" => Ok(json!({"content": [{"type": "text", "text": "it broke"}], "isError": true})),
        other => Err(json!({"code": -32602, "message": format!("unknown tool: {}", other)})),
    }
}

fn list_tools(config: &ServerConfig, params: Option<&Value>) -> Value {
    let tools = tool_list();
    let Some(size) = config.page_size else {
        return json!({"tools": tools});
    };
    let start: usize = params
        .and_then(|p| p.get("cursor"))
        .and_then(Value::as_str)
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let end = (start + size).min(tools.len());
    let page_tools = tools[start.min(end)..end].to_vec();
    let mut page = json!({"tools": page_tools});
    if end < tools.len() {
        page["nextCursor"] = json!(end.to_string());
    }
    page
}

fn write_message(out: &mut impl Write, message: &Value) {
    let _ = writeln!(out, "{}", message);
    let _ = out.flush();
}

fn main() {
    let config = ServerConfig::from_args();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { return };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request) = serde_json::from_str::<Incoming>(&line) else {
            continue;
        };
        // Notifications get no answer.
        let Some(id) = request.id else { continue };

        let outcome = match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock-mcp-server", "version": "1.0.0"}
            })),
            "tools/list" => Ok(list_tools(&config, request.params.as_ref())),
            "tools/call" => call_tool(&config, request.params.as_ref().unwrap_or(&Value::Null)),
            other => Err(json!({"code": -32601, "message": format!("method not found: {}", other)})),
        };

        write_message(
            &mut stdout,
            &json!({"jsonrpc": "2.0", "method": "notifications/message",
                    "params": {"level": "debug", "data": format!("handling {}", request.method)}}),
        );

        let response = match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        };
        write_message(&mut stdout, &response);
    }
}
