//! MCP failures and how they map onto tool and orchestration errors.

use muster_types::{MusterError, ToolError};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be launched or its pipes captured.
    #[error("cannot launch MCP server: {0}")]
    Launch(String),

    #[error("MCP transport: {0}")]
    Transport(String),

    /// The peer sent something that is not a valid MCP message.
    #[error("MCP protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON-RPC error object returned by the server.
    #[error("server replied {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("MCP handshake has not completed")]
    NotReady,

    #[error("MCP server closed the connection")]
    Closed,

    #[error("no MCP server provides '{0}'")]
    UnknownTool(String),
}

impl McpError {
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data,
        }
    }

    /// True when the server could not be reached at all. A server that
    /// answers with an error is reachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Launch(_) | Self::Transport(_) | Self::Io(_) | Self::Closed | Self::NotReady
        )
    }

    /// Classify as a tool failure of `tool`: unreachable servers are
    /// infrastructure failures, anything the server said is a logical one.
    pub fn into_tool_error(self, tool: &str) -> ToolError {
        if let Self::UnknownTool(name) = self {
            return ToolError::NotFound(name);
        }
        let message = self.to_string();
        let tool = tool.to_string();
        if self.is_connectivity() {
            ToolError::Unreachable { tool, message }
        } else {
            ToolError::Failed { tool, message }
        }
    }
}

impl From<McpError> for MusterError {
    fn from(err: McpError) -> Self {
        let tool = match err {
            McpError::UnknownTool(ref name) => name.clone(),
            _ => String::new(),
        };
        MusterError::ToolInvocationFailed {
            subject: "mcp".to_string(),
            operation: "call".to_string(),
            tool,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_message_carries_code() {
        let err = McpError::rpc(-32600, "Invalid Request", None);
        assert_eq!(err.to_string(), "server replied -32600: Invalid Request");
        assert!(!err.is_connectivity());
    }

    #[test]
    fn test_tool_error_classification() {
        let err = McpError::Closed.into_tool_error("x_k8s_get");
        assert!(err.is_infrastructure());
        assert!(matches!(err, ToolError::Unreachable { ref tool, .. } if tool == "x_k8s_get"));

        let err = McpError::launch("mcp-kubernetes: not found").into_tool_error("x_k8s_get");
        assert!(err.is_infrastructure());

        let err = McpError::rpc(-32602, "bad params", None).into_tool_error("x_k8s_get");
        assert!(!err.is_infrastructure());

        let err = McpError::UnknownTool("x_nope".into()).into_tool_error("x_nope");
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn test_unknown_tool_into_muster_error() {
        let err: MusterError = McpError::UnknownTool("x_nope".into()).into();
        match err {
            MusterError::ToolInvocationFailed { tool, .. } => assert_eq!(tool, "x_nope"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
