//! Argument schema checking for workflow inputs and instance creation args.

use serde_json::{Map, Value};

use crate::definition::ArgSchema;
use crate::error::{MusterError, Result};

/// Validate `args` against `schema` and return them with defaults applied.
///
/// Order of checks: required arguments first, then types of the supplied
/// arguments, then defaults for anything still missing. Unknown schema types
/// pass and arguments not in the schema are kept as-is.
pub fn validate_args(schema: &ArgSchema, args: &Map<String, Value>, subject: &str) -> Result<Map<String, Value>> {
    for (name, def) in schema {
        if def.required && !args.contains_key(name) {
            return Err(MusterError::InputValidation {
                subject: subject.to_string(),
                message: format!("required argument '{}' is missing", name),
            });
        }
    }

    for (name, value) in args {
        if let Some(def) = schema.get(name)
            && !matches_type(value, &def.arg_type)
        {
            return Err(MusterError::InputValidation {
                subject: subject.to_string(),
                message: format!(
                    "argument '{}' must be of type {}, got {}",
                    name,
                    def.arg_type,
                    type_name(value)
                ),
            });
        }
    }

    let mut out = args.clone();
    for (name, def) in schema {
        if !out.contains_key(name)
            && let Some(ref default) = def.default
        {
            out.insert(name.clone(), default.clone());
        }
    }
    Ok(out)
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// JSON type name of a value, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ArgDefinition;
    use serde_json::json;

    fn arg(arg_type: &str, required: bool, default: Option<Value>) -> ArgDefinition {
        ArgDefinition {
            arg_type: arg_type.to_string(),
            required,
            default,
            description: String::new(),
        }
    }

    fn schema() -> ArgSchema {
        let mut s = ArgSchema::new();
        s.insert("name".into(), arg("string", true, None));
        s.insert("replicas".into(), arg("integer", false, Some(json!(1))));
        s.insert("labels".into(), arg("object", false, None));
        s
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_missing_required() {
        let err = validate_args(&schema(), &args(json!({})), "deploy").unwrap_err();
        assert!(matches!(err, MusterError::InputValidation { .. }));
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_args(&schema(), &args(json!({"name": 5})), "deploy").unwrap_err();
        assert!(err.to_string().contains("must be of type string, got number"));
    }

    #[test]
    fn test_defaults_applied_and_extras_kept() {
        let out = validate_args(&schema(), &args(json!({"name": "demo", "extra": true})), "deploy").unwrap();
        assert_eq!(out["replicas"], json!(1));
        assert_eq!(out["extra"], json!(true));
        assert!(!out.contains_key("labels"));
    }

    #[test]
    fn test_integer_rejects_float() {
        let err = validate_args(&schema(), &args(json!({"name": "a", "replicas": 1.5})), "deploy");
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_type_passes() {
        let mut s = ArgSchema::new();
        s.insert("x".into(), arg("duration", false, None));
        assert!(validate_args(&s, &args(json!({"x": [1]})), "w").is_ok());
    }
}
