//! MCP client and tool aggregator.
//!
//! Connects to MCP servers over stdio or HTTP, indexes their tools under
//! `x_<prefix>_<tool>` names, hosts in-process `core_` tools, and exposes the
//! whole set through [`muster_types::ToolInvoker`].

pub mod aggregator;
pub mod client;
pub mod error;
pub mod local;
pub mod naming;
pub mod protocol;
pub mod transport;

pub use aggregator::{McpAggregator, ServerStatus};
pub use client::McpClient;
pub use error::{McpError, Result};
pub use local::{FnTool, LocalTool};
pub use naming::{EXTERNAL_TOOL_PREFIX, exposed_tool_name};
pub use protocol::{CallToolResult, ServerInfo, ToolInfo};
pub use transport::{HttpEndpoint, Transport};
