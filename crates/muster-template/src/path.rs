//! Dot-path access into JSON values.
//!
//! Paths look like `args.name`, `.service.outputs.port` or `items[0].id`.
//! A leading dot is accepted and ignored.

use std::fmt;

use serde_json::Value;

/// A segment of a dot-separated path, optionally with an array index.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<usize>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.name, i),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parse a dot-separated path into segments, handling array indices.
///
/// `"task.items[0].name"` → `[("task", None), ("items", Some(0)), ("name", None)]`
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let trimmed = path.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('.')
        .map(|part| {
            if let Some(bracket_start) = part.find('[')
                && let Some(bracket_end) = part.find(']')
                && bracket_end > bracket_start
            {
                let name = part[..bracket_start].to_string();
                let index = part[bracket_start + 1..bracket_end].parse::<usize>().ok();
                return PathSegment { name, index };
            }
            PathSegment {
                name: part.to_string(),
                index: None,
            }
        })
        .collect()
}

/// Navigate one segment of a path through a JSON value.
pub fn navigate_segment<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    let field = if segment.name.is_empty() {
        value
    } else {
        value.get(&segment.name)?
    };

    match segment.index {
        Some(i) => field.get(i),
        None => Some(field),
    }
}

/// Look up `path` in `root`. An empty path returns `root` itself.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in parse_path(path) {
        current = navigate_segment(current, &segment)?;
    }
    Some(current)
}

/// Convert a JSON value to its string form for interpolation and comparison.
///
/// Strings render without quotes; objects and arrays render as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Truthiness used by `{{if}}` blocks: non-null, non-false, non-zero, non-empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "args": {"name": "demo", "count": 3},
            "items": [{"id": "a"}, {"id": "b"}],
        })
    }

    #[test]
    fn test_leading_dot_optional() {
        let d = doc();
        assert_eq!(lookup(&d, ".args.name"), Some(&json!("demo")));
        assert_eq!(lookup(&d, "args.name"), Some(&json!("demo")));
    }

    #[test]
    fn test_array_index() {
        let d = doc();
        assert_eq!(lookup(&d, "items[1].id"), Some(&json!("b")));
        assert_eq!(lookup(&d, "items[5].id"), None);
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(lookup(&doc(), "args.nope"), None);
    }

    #[test]
    fn test_empty_path_is_root() {
        let d = doc();
        assert_eq!(lookup(&d, ""), Some(&d));
    }

    #[test]
    fn test_segment_display() {
        let segs = parse_path("items[0].id");
        assert_eq!(segs[0].to_string(), "items[0]");
        assert_eq!(segs[1].to_string(), "id");
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("x")), "x");
        assert_eq!(value_to_string(&json!(1)), "1");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(value_to_string(&Value::Null), "");
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(2.5)));
        assert!(is_truthy(&json!({"k": 1})));
    }
}
