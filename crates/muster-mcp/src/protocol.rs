//! Wire messages: JSON-RPC envelopes and the MCP payloads muster uses.
//!
//! Only the handshake and the `tools/*` methods are modelled. Everything else
//! a server sends (logging, progress, pings) is read as an [`Incoming`] and
//! skipped by the transport.

use muster_types::ToolResult;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// MCP revision requested during the handshake.
pub const PROTOCOL_REVISION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// A message we send. Without an id it is a notification and gets no reply.
#[derive(Debug, Clone, Serialize)]
pub struct Outgoing {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Outgoing {
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Anything a server writes: a reply to one of our requests, or a message of
/// its own when `method` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Incoming {
    /// Whether this is the reply to request `id`.
    pub fn answers(&self, id: u64) -> bool {
        self.method.is_none() && self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The result payload; a reply with neither field counts as `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// `initialize` params. Muster advertises no client capabilities.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_REVISION,
        "capabilities": {},
        "clientInfo": {
            "name": "muster",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ServerInfo,
}

impl Handshake {
    /// Whether the server promises `notifications/tools/list_changed`.
    pub fn announces_tool_changes(&self) -> bool {
        self.capabilities
            .pointer("/tools/listChanged")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// One page of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPage {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ToolPage {
    /// Cursor for the next page; servers may send an empty string on the last.
    pub fn next(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

pub fn call_params(name: &str, arguments: Option<Value>) -> Value {
    match arguments {
        Some(arguments) => json!({ "name": name, "arguments": arguments }),
        None => json!({ "name": name }),
    }
}

/// Content item of a tool result. Only text is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text items joined by newlines, or `None` when there are none.
    pub fn text(&self) -> Option<String> {
        let mut texts = self.content.iter().filter_map(|c| match c {
            ToolContent::Text { text } => Some(text.as_str()),
            ToolContent::Other => None,
        });
        let first = texts.next()?;
        Some(texts.fold(first.to_string(), |mut joined, t| {
            joined.push('\n');
            joined.push_str(t);
            joined
        }))
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Reduce to the shape the orchestrator and workflow engine consume.
    ///
    /// Structured content wins. Otherwise text that parses as JSON becomes
    /// that value and any other text stays a string.
    pub fn into_tool_result(self) -> ToolResult {
        let content = if let Some(structured) = self.structured_content {
            structured
        } else {
            let text = self.text();
            match text {
                Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                None => Value::Null,
            }
        };
        ToolResult {
            is_error: self.is_error,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(raw: &str) -> Incoming {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_notification_has_no_id() {
        let wire = serde_json::to_value(Outgoing::notification("notifications/initialized", None)).unwrap();
        assert_eq!(wire, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));

        let wire = serde_json::to_value(Outgoing::request(4, "tools/list", None)).unwrap();
        assert_eq!(wire["id"], 4);
    }

    #[test]
    fn test_answers_only_matching_reply() {
        let reply = incoming(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#);
        assert!(!reply.answers(8));
        assert!(reply.answers(7));
        assert_eq!(reply.into_result().unwrap(), json!({"ok": true}));

        let log = incoming(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#);
        assert!(!log.answers(7));

        // A server-initiated request reusing our id is not a reply.
        let ping = incoming(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#);
        assert!(!ping.answers(7));
    }

    #[test]
    fn test_error_reply() {
        let reply = incoming(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#);
        assert!(reply.is_error());
        assert_eq!(reply.into_result().unwrap_err().code, -32600);
    }

    #[test]
    fn test_handshake() {
        let params = initialize_params();
        assert_eq!(params["protocolVersion"], PROTOCOL_REVISION);
        assert_eq!(params["clientInfo"]["name"], "muster");

        let hs: Handshake = serde_json::from_value(json!({
            "protocolVersion": PROTOCOL_REVISION,
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "kube"},
        }))
        .unwrap();
        assert!(hs.announces_tool_changes());
        assert_eq!(hs.server_info.version, "");
    }

    #[test]
    fn test_tool_page_cursor() {
        let page: ToolPage = serde_json::from_value(json!({"tools": [{"name": "a"}], "nextCursor": ""})).unwrap();
        assert_eq!(page.next(), None);
        let page: ToolPage = serde_json::from_value(json!({"tools": [], "nextCursor": "p2"})).unwrap();
        assert_eq!(page.next(), Some("p2"));
    }

    #[test]
    fn test_unknown_content_types_are_tolerated() {
        let json = r#"{"content":[{"type":"image","data":"...","mimeType":"image/png"},{"type":"text","text":"hi"}]}"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_into_tool_result() {
        let result: CallToolResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"{\"status\":\"ok\"}"}]}"#).unwrap();
        let tool = result.into_tool_result();
        assert!(tool.is_success());
        assert_eq!(tool.content, json!({"status": "ok"}));

        let result: CallToolResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"boom"}],"isError":true}"#).unwrap();
        let tool = result.into_tool_result();
        assert!(!tool.is_success());
        assert_eq!(tool.content, json!("boom"));

        let result: CallToolResult = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"summary"}],"structuredContent":{"count":3}}"#,
        )
        .unwrap();
        assert_eq!(result.into_tool_result().content, json!({"count": 3}));
    }
}
