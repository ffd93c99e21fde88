//! Output extraction from tool results.

use std::borrow::Cow;
use std::collections::BTreeMap;

use muster_types::ToolResult;
use serde_json::{Map, Value};
use tracing::debug;

use crate::path::lookup;

/// The part of a result that field paths are evaluated against.
///
/// When the content carries a `text` field holding JSON (the usual MCP
/// shape), that JSON is used; otherwise the content itself.
pub fn result_payload(content: &Value) -> Cow<'_, Value> {
    let text = match content {
        Value::Object(map) => map.get("text").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    if let Some(text) = text
        && let Ok(parsed) = serde_json::from_str::<Value>(text)
        && (parsed.is_object() || parsed.is_array())
    {
        return Cow::Owned(parsed);
    }
    Cow::Borrowed(content)
}

/// Extract declared outputs (`path -> variable`) from a result.
///
/// Paths that do not resolve are skipped.
pub fn extract_outputs(result: &ToolResult, outputs: &BTreeMap<String, String>) -> Map<String, Value> {
    let mut extracted = Map::new();
    if outputs.is_empty() {
        return extracted;
    }
    let payload = result_payload(&result.content);
    for (path, var) in outputs {
        match lookup(&payload, path) {
            Some(value) if !value.is_null() => {
                debug!(output = %var, path = %path, "Extracted output");
                extracted.insert(var.clone(), value.clone());
            }
            _ => {
                debug!(output = %var, path = %path, "Output path not present in result");
            }
        }
    }
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(p, v)| (p.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_extract_from_plain_content() {
        let r = ToolResult::ok(json!({"session": {"id": "s-1"}, "port": 9000}));
        let out = extract_outputs(&r, &outputs(&[("session.id", "sessionId"), ("port", "localPort")]));
        assert_eq!(out["sessionId"], json!("s-1"));
        assert_eq!(out["localPort"], json!(9000));
    }

    #[test]
    fn test_extract_from_text_json() {
        let r = ToolResult::ok(json!({"text": "{\"result\": {\"id\": 7}}"}));
        let out = extract_outputs(&r, &outputs(&[("result.id", "id")]));
        assert_eq!(out["id"], json!(7));
    }

    #[test]
    fn test_missing_paths_skipped() {
        let r = ToolResult::ok(json!({"a": 1}));
        let out = extract_outputs(&r, &outputs(&[("b.c", "x"), ("a", "y")]));
        assert!(!out.contains_key("x"));
        assert_eq!(out["y"], json!(1));
    }

    #[test]
    fn test_non_json_text_kept_as_is() {
        let content = json!({"text": "all good"});
        assert_eq!(&*result_payload(&content), &content);
    }
}
