//! Lifecycle and execution events.
//!
//! Every state transition and step outcome is reported as an [`Event`] with
//! a stable [`ReasonCode`] and a message rendered from a per-reason template.

pub mod catalog;
pub mod emitter;
pub mod event;
pub mod reason;
pub mod sink;

pub use catalog::{MessageCatalog, default_template, fallback_message};
pub use emitter::EventEmitter;
pub use event::{Event, EventData};
pub use reason::{ReasonCode, Severity, SubjectKind};
pub use sink::{BroadcastSink, EventSink, FanoutSink, MemorySink, TracingSink};
