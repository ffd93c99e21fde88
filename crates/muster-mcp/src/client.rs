//! MCP client for a single server.

use std::sync::atomic::{AtomicU64, Ordering};

use muster_config::McpServerEntry;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolResult, Handshake, Outgoing, ServerInfo, ToolInfo, ToolPage, call_params, initialize_params,
};
use crate::transport::{HttpEndpoint, Transport};

/// Guard against servers that never stop paginating.
const MAX_TOOL_PAGES: usize = 64;

/// An MCP client connected to a single server.
///
/// All calls are blocking; async callers run them on a blocking thread.
pub struct McpClient {
    name: String,
    transport: Mutex<Transport>,
    server_info: Option<ServerInfo>,
    request_id: AtomicU64,
}

impl McpClient {
    /// Open the transport described by `entry`.
    ///
    /// This does NOT perform the handshake; call [`initialize`](Self::initialize).
    pub fn connect(entry: &McpServerEntry) -> Result<Self> {
        let transport = if entry.is_http() {
            let endpoint = HttpEndpoint::from_entry(entry)?;
            tracing::info!(server = %entry.name, url = %endpoint.url, "connected to MCP server via HTTP");
            Transport::http(endpoint)?
        } else {
            if entry.command.is_empty() {
                return Err(McpError::launch(format!("server '{}' has no command", entry.name)));
            }
            let transport = Transport::spawn(&entry.command, &entry.args, &entry.env_tuples())?;
            tracing::info!(server = %entry.name, command = %entry.command, "connected to MCP server via stdio");
            transport
        };

        Ok(Self {
            name: entry.name.clone(),
            transport: Mutex::new(transport),
            server_info: None,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server info, once initialized.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.is_some()
    }

    fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = Outgoing::request(self.request_id.fetch_add(1, Ordering::SeqCst), method, params);
        let reply = self
            .transport
            .lock()
            .send(&request)?
            .ok_or_else(|| McpError::protocol(format!("no reply to '{}'", method)))?;
        reply.into_result().map_err(|e| McpError::rpc(e.code, e.message, e.data))
    }

    fn send_notification(&self, method: &str) -> Result<()> {
        self.transport.lock().send(&Outgoing::notification(method, None)).map(|_| ())
    }

    /// Perform the MCP handshake. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.server_info.is_none() {
            let result = self.send_request("initialize", Some(initialize_params()))?;
            let init: Handshake = serde_json::from_value(result)?;

            tracing::info!(
                server = %self.name,
                remote = %init.server_info.name,
                version = %init.server_info.version,
                protocol = %init.protocol_version,
                list_changed = init.announces_tool_changes(),
                "MCP server initialized"
            );

            self.send_notification("notifications/initialized")?;
            self.server_info = Some(init.server_info);
        }
        self.server_info.as_ref().ok_or(McpError::NotReady)
    }

    /// Every tool the server advertises, following pagination cursors.
    pub fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        if !self.is_initialized() {
            return Err(McpError::NotReady);
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let page: ToolPage = serde_json::from_value(self.send_request("tools/list", params)?)?;
            cursor = page.next().map(String::from);
            tools.extend(page.tools);
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(server = %self.name, tool_count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    /// Call a tool by its server-side name.
    pub fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        if !self.is_initialized() {
            return Err(McpError::NotReady);
        }

        let result = self.send_request("tools/call", Some(call_params(name, arguments)))?;
        let call_result: CallToolResult = serde_json::from_value(result)?;

        if call_result.is_error() {
            tracing::warn!(server = %self.name, tool = %name, "tool call returned error");
        } else {
            tracing::debug!(server = %self.name, tool = %name, "tool call succeeded");
        }
        Ok(call_result)
    }

    /// Stop the server process or drop the HTTP session.
    pub fn shutdown(&self) {
        tracing::info!(server = %self.name, "shutting down MCP client");
        self.transport.lock().close();
    }

    /// Whether the connection is still usable. Never blocks on a busy call.
    pub fn is_connected(&self) -> bool {
        match self.transport.try_lock() {
            Some(mut transport) => transport.is_alive(),
            // A call in flight means the transport is alive.
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_missing_command() {
        let entry = McpServerEntry::new("empty", "");
        match McpClient::connect(&entry) {
            Err(McpError::Launch(msg)) => assert!(msg.contains("no command")),
            _ => panic!("expected Launch error"),
        }
    }

    #[test]
    fn test_connect_http_requires_url() {
        let mut entry = McpServerEntry::http("remote", "http://localhost:9/mcp");
        entry.url = None;
        match McpClient::connect(&entry) {
            Err(McpError::Transport(msg)) => assert!(msg.contains("requires a URL")),
            _ => panic!("expected Transport error"),
        }
    }

    #[test]
    fn test_connect_http_does_not_touch_network() {
        let entry = McpServerEntry::http("remote", "http://localhost:9/mcp");
        let client = McpClient::connect(&entry).unwrap();
        assert_eq!(client.name(), "remote");
        assert!(!client.is_initialized());
        assert!(matches!(client.list_tools(), Err(McpError::NotReady)));
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        if !cfg!(unix) {
            return;
        }
        let client = McpClient::connect(&McpServerEntry::new("cat", "cat")).unwrap();
        assert!(client.is_connected());
        assert!(matches!(
            client.call_tool("anything", None),
            Err(McpError::NotReady)
        ));
        client.shutdown();
        assert!(!client.is_connected());
    }
}
