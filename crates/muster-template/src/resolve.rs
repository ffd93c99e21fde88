//! Template resolution over JSON value trees.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::template::{RenderMode, Template};

/// Resolve all templates in a JSON value tree.
///
/// - Strings: parsed and rendered
/// - Objects/Arrays: recursively resolved
/// - Other types: returned unchanged
pub fn resolve_value(value: &Value, ctx: &Value, mode: RenderMode) -> Result<Value> {
    match value {
        Value::String(s) if s.contains("{{") => Template::parse(s)?.render(ctx, mode),
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, ctx, mode)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(arr) => {
            let resolved: Result<Vec<Value>> = arr.iter().map(|v| resolve_value(v, ctx, mode)).collect();
            Ok(Value::Array(resolved?))
        }
        other => Ok(other.clone()),
    }
}

/// Strictly resolve a tool call's argument map into a JSON object.
pub fn resolve_args(args: &BTreeMap<String, Value>, ctx: &Value) -> Result<Map<String, Value>> {
    let mut resolved = Map::new();
    for (key, value) in args {
        resolved.insert(key.clone(), resolve_value(value, ctx, RenderMode::Strict)?);
    }
    Ok(resolved)
}

/// Render a template string in one go.
pub fn render_str(source: &str, ctx: &Value, mode: RenderMode) -> Result<String> {
    Template::parse(source)?.render_string(ctx, mode)
}
