//! Exposed names for server tools.

/// Prefix marking a tool as provided by an external server.
pub const EXTERNAL_TOOL_PREFIX: &str = "x_";

/// The name under which `tool` from a server with `prefix` is exposed:
/// `x_<prefix>_<tool>`. A tool already named `<prefix>_...` is not prefixed twice.
pub fn exposed_tool_name(prefix: &str, tool: &str) -> String {
    let scoped = format!("{prefix}_");
    if tool.starts_with(&scoped) {
        format!("{EXTERNAL_TOOL_PREFIX}{tool}")
    } else {
        format!("{EXTERNAL_TOOL_PREFIX}{scoped}{tool}")
    }
}
