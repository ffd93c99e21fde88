//! Expectation evaluation against tool results.

use muster_types::{Expectation, ToolResult};
use serde_json::Value;

use crate::extract::result_payload;
use crate::path::{lookup, value_to_string};

/// Check one expectation, returning a description of the first mismatch.
///
/// `success` (default `true`) is compared with the result's success flag.
/// Field checks compare rendered strings, so `"1"` matches `1`.
pub fn check(result: &ToolResult, expectation: &Expectation) -> Result<(), String> {
    let expected_success = expectation.success.unwrap_or(true);
    if result.is_success() != expected_success {
        return Err(format!(
            "expected success={}, got success={}",
            expected_success,
            result.is_success()
        ));
    }

    if expectation.field_checks.is_empty() {
        return Ok(());
    }
    let payload = result_payload(&result.content);
    for (path, expected) in &expectation.field_checks {
        let actual = lookup(&payload, path);
        if !values_match(actual, expected) {
            return Err(match actual {
                Some(v) => format!(
                    "field '{}' is '{}', expected '{}'",
                    path,
                    value_to_string(v),
                    value_to_string(expected)
                ),
                None => format!(
                    "field '{}' is missing, expected '{}'",
                    path,
                    value_to_string(expected)
                ),
            });
        }
    }
    Ok(())
}

/// Whether `result` satisfies `expectation`.
pub fn matches(result: &ToolResult, expectation: &Expectation) -> bool {
    check(result, expectation).is_ok()
}

/// Combined verdict: `expect` must hold and `expect_not` must not.
///
/// With neither given, the verdict is plain success.
pub fn evaluate(
    result: &ToolResult,
    expect: Option<&Expectation>,
    expect_not: Option<&Expectation>,
) -> bool {
    explain(result, expect, expect_not).is_ok()
}

/// Like [`evaluate`], with the reason on a negative verdict.
pub fn explain(
    result: &ToolResult,
    expect: Option<&Expectation>,
    expect_not: Option<&Expectation>,
) -> Result<(), String> {
    if expect.is_none() && expect_not.is_none() {
        if result.is_success() {
            return Ok(());
        }
        return Err(format!("tool reported an error: {}", result.text()));
    }
    if let Some(e) = expect {
        check(result, e)?;
    }
    if let Some(n) = expect_not
        && matches(result, n)
    {
        return Err("result matched expectNot".to_string());
    }
    Ok(())
}

fn values_match(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None | Some(Value::Null), Value::Null) => true,
        (None, _) | (Some(Value::Null), _) => false,
        (Some(a), e) => value_to_string(a) == value_to_string(e),
    }
}
