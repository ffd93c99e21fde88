//! Parsed templates as a tree of literal, variable and optional-block segments.
//!
//! # Syntax
//!
//! - `{{ .path.to.value }}`: variable reference (leading dot optional)
//! - `{{if .path}} ... {{end}}`: body rendered only when `path` is truthy
//!
//! Blocks nest. A template that consists of exactly one variable reference
//! renders to the referenced JSON value unchanged; anything else renders to a
//! string.

use serde_json::Value;

use crate::error::{Result, TemplateError};
use crate::path::{is_truthy, navigate_segment, parse_path, value_to_string};

/// How unresolved references are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// An unresolved reference is an error. Used for tool arguments.
    Strict,
    /// An unresolved reference renders empty. Used for event messages.
    Lenient,
}

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Variable(String),
    Optional { path: String, body: Vec<Segment> },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text into a segment tree.
    pub fn parse(source: &str) -> Result<Self> {
        // Each frame is an open block: its condition path (None for the root) and body.
        let mut stack: Vec<(Option<String>, Vec<Segment>)> = vec![(None, Vec::new())];
        let mut remaining = source;

        while let Some(start) = remaining.find("{{") {
            let Some(end) = remaining[start..].find("}}") else {
                // Unclosed `{{`: keep the rest as text
                break;
            };
            if start > 0 {
                push(&mut stack, Segment::Literal(remaining[..start].to_string()));
            }
            let inner = remaining[start + 2..start + end].trim();
            remaining = &remaining[start + end + 2..];

            if inner == "end" {
                if stack.len() < 2 {
                    return Err(TemplateError::parse(source, "{{end}} without matching {{if}}"));
                }
                if let Some((Some(path), body)) = stack.pop() {
                    push(&mut stack, Segment::Optional { path, body });
                }
            } else if let Some(cond) = inner.strip_prefix("if ").or_else(|| inner.strip_prefix("if\t")) {
                let cond = cond.trim();
                if cond.is_empty() {
                    return Err(TemplateError::parse(source, "{{if}} needs a path"));
                }
                stack.push((Some(cond.to_string()), Vec::new()));
            } else if inner.is_empty() {
                return Err(TemplateError::parse(source, "empty expression"));
            } else {
                push(&mut stack, Segment::Variable(inner.to_string()));
            }
        }

        if !remaining.is_empty() {
            push(&mut stack, Segment::Literal(remaining.to_string()));
        }
        if stack.len() > 1 {
            return Err(TemplateError::parse(source, "{{if}} without matching {{end}}"));
        }
        let segments = stack.pop().map(|(_, body)| body).unwrap_or_default();

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The top-level segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the template contains no references at all.
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Every path referenced by a variable or block, in order of appearance.
    pub fn references(&self) -> Vec<&str> {
        fn walk<'a>(segments: &'a [Segment], out: &mut Vec<&'a str>) {
            for seg in segments {
                match seg {
                    Segment::Literal(_) => {}
                    Segment::Variable(p) => out.push(p),
                    Segment::Optional { path, body } => {
                        out.push(path);
                        walk(body, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.segments, &mut out);
        out
    }

    /// Render against `ctx`. A lone variable keeps its JSON type.
    pub fn render(&self, ctx: &Value, mode: RenderMode) -> Result<Value> {
        if let [Segment::Variable(path)] = self.segments.as_slice() {
            return match resolve_path(ctx, path) {
                Ok(v) => Ok(v.clone()),
                Err(_) if mode == RenderMode::Lenient => Ok(Value::String(String::new())),
                Err(e) => Err(e),
            };
        }
        self.render_string(ctx, mode).map(Value::String)
    }

    /// Render against `ctx`, always producing a string.
    pub fn render_string(&self, ctx: &Value, mode: RenderMode) -> Result<String> {
        let mut out = String::new();
        render_into(&self.segments, ctx, mode, &mut out)?;
        Ok(out)
    }
}

fn push(stack: &mut [(Option<String>, Vec<Segment>)], seg: Segment) {
    if let Some((_, body)) = stack.last_mut() {
        body.push(seg);
    }
}

fn render_into(segments: &[Segment], ctx: &Value, mode: RenderMode, out: &mut String) -> Result<()> {
    for seg in segments {
        match seg {
            Segment::Literal(text) => out.push_str(text),
            Segment::Variable(path) => match resolve_path(ctx, path) {
                Ok(v) => out.push_str(&value_to_string(v)),
                Err(_) if mode == RenderMode::Lenient => {}
                Err(e) => return Err(e),
            },
            Segment::Optional { path, body } => {
                let present = resolve_path(ctx, path).map(is_truthy).unwrap_or(false);
                if present {
                    render_into(body, ctx, mode, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Resolve a reference against the context, distinguishing an unknown root
/// key from a missing nested segment.
pub fn resolve_path<'a>(ctx: &'a Value, path: &str) -> Result<&'a Value> {
    let segments = parse_path(path);
    let Some((first, rest)) = segments.split_first() else {
        return Ok(ctx);
    };

    if ctx.get(&first.name).is_none() {
        return Err(TemplateError::UnknownKey {
            path: path.to_string(),
            key: first.name.clone(),
        });
    }

    let mut current = ctx;
    for segment in std::iter::once(first).chain(rest) {
        current = navigate_segment(current, segment).ok_or_else(|| TemplateError::UnresolvedSegment {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current)
}
