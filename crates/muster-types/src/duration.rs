//! Parsing for the short duration strings used in definition documents.
//!
//! Accepted forms are an unsigned integer followed by one unit:
//! `ms`, `s`, `m` or `h` (e.g. `"500ms"`, `"30s"`, `"5m"`, `"1h"`).
//! A bare integer is read as seconds.

use std::time::Duration;

/// Parse a duration string such as `"30s"` or `"5m"`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("duration '{}' must start with a number", input));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", input, e))?;

    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit '{}' in '{}'", other, input)),
    }
}

/// Parse an optional duration string, falling back to `default` when absent.
pub fn parse_duration_or(input: Option<&str>, default: Duration) -> Result<Duration, String> {
    match input {
        Some(s) => parse_duration(s),
        None => Ok(default),
    }
}
