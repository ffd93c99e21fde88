//! Live variable bindings for one run or lifecycle operation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::path::lookup;
use crate::resolve::{resolve_args, resolve_value};
use crate::template::RenderMode;

/// Mapping from variable name to value, extended in place as outputs are bound.
///
/// The root is always a JSON object so it can be handed to the renderer
/// without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    root: Value,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// An empty context.
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// A context seeded with `bindings`.
    pub fn from_map(bindings: Map<String, Value>) -> Self {
        Self {
            root: Value::Object(bindings),
        }
    }

    /// Bind `key` at the root, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Some(map) = self.root.as_object_mut() {
            map.insert(key.into(), value);
        }
    }

    /// Bind every entry of `bindings` at the root.
    pub fn extend(&mut self, bindings: &Map<String, Value>) {
        if let Some(map) = self.root.as_object_mut() {
            for (k, v) in bindings {
                map.insert(k.clone(), v.clone());
            }
        }
    }

    /// Bind `key` inside the object at `parent`, creating it if needed.
    pub fn insert_nested(&mut self, parent: &str, key: impl Into<String>, value: Value) {
        let Some(map) = self.root.as_object_mut() else {
            return;
        };
        let slot = map
            .entry(parent.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(m) = slot {
            m.insert(key.into(), value);
        }
    }

    /// Top-level binding.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Dot-path lookup, e.g. `results.create.status`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// The whole context as a JSON object.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Strictly resolve a tool call's arguments against this context.
    pub fn resolve_args(&self, args: &BTreeMap<String, Value>) -> Result<Map<String, Value>> {
        resolve_args(args, &self.root)
    }

    /// Resolve a single templated value.
    pub fn resolve(&self, value: &Value, mode: RenderMode) -> Result<Value> {
        resolve_value(value, &self.root, mode)
    }
}
