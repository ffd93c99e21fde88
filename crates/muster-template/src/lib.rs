//! Template resolution, execution context and expectation evaluation.
//!
//! These primitives are shared by the service lifecycle orchestrator, the
//! workflow engine and the event catalog.

pub mod context;
pub mod error;
pub mod expect;
pub mod extract;
pub mod path;
pub mod resolve;
pub mod template;

pub use context::ExecutionContext;
pub use error::{Result, TemplateError};
pub use expect::{evaluate, explain};
pub use extract::{extract_outputs, result_payload};
pub use path::{is_truthy, lookup, value_to_string};
pub use resolve::{render_str, resolve_args, resolve_value};
pub use template::{RenderMode, Segment, Template};
