//! Builds events from reason codes and hands them to a sink.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::catalog::MessageCatalog;
use crate::event::{Event, EventData};
use crate::reason::ReasonCode;
use crate::sink::{EventSink, TracingSink};

/// Renders and dispatches events. Cheap to clone.
#[derive(Clone)]
pub struct EventEmitter {
    catalog: Arc<RwLock<MessageCatalog>>,
    sink: Arc<dyn EventSink>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl EventEmitter {
    /// Emitter with the default catalog.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_catalog(sink, MessageCatalog::default())
    }

    pub fn with_catalog(sink: Arc<dyn EventSink>, catalog: MessageCatalog) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(catalog)),
            sink,
        }
    }

    /// Replace the template for `reason` on this emitter and all its clones.
    pub fn set_template(&self, reason: ReasonCode, template: &str) -> Result<(), muster_template::TemplateError> {
        self.catalog.write().set(reason, template)
    }

    /// Build the event for `reason` without emitting it.
    pub fn build(&self, reason: ReasonCode, data: &EventData) -> Event {
        Event {
            subject_kind: reason.subject_kind(),
            subject_name: data.name.clone(),
            subject_scope: data.scope.clone(),
            reason,
            message: self.catalog.read().render(reason, data),
            severity: reason.severity(),
            timestamp: Utc::now(),
        }
    }

    /// Render and emit an event.
    pub fn emit(&self, reason: ReasonCode, data: EventData) {
        let event = self.build(reason, &data);
        self.sink.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::{Severity, SubjectKind};
    use crate::sink::{BroadcastSink, FanoutSink, MemorySink};

    #[test]
    fn test_emit_to_memory() {
        let sink = Arc::new(MemorySink::new());
        let emitter = EventEmitter::new(sink.clone());
        emitter.emit(
            ReasonCode::ServiceInstanceFailed,
            EventData::new("default", "api-1").operation("start").error("connection refused"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.subject_kind, SubjectKind::ServiceInstance);
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(
            e.message,
            "Service instance api-1 start operation failed: connection refused"
        );
    }

    #[test]
    fn test_override_shared_between_clones() {
        let sink = Arc::new(MemorySink::new());
        let emitter = EventEmitter::new(sink.clone());
        let clone = emitter.clone();
        emitter
            .set_template(ReasonCode::WorkflowStepStarted, "go {{.stepId}}")
            .unwrap();
        clone.emit(
            ReasonCode::WorkflowStepStarted,
            EventData::new("default", "wf").step("s1", "t"),
        );
        assert_eq!(sink.events()[0].message, "go s1");
    }

    #[tokio::test]
    async fn test_fanout_reaches_broadcast_subscribers() {
        let broadcast = Arc::new(BroadcastSink::new(16));
        let memory = Arc::new(MemorySink::new());
        let mut rx = broadcast.subscribe();
        let fanout = FanoutSink::new().with(broadcast.clone()).with(memory.clone());
        let emitter = EventEmitter::new(Arc::new(fanout));

        emitter.emit(ReasonCode::WorkflowCreated, EventData::new("default", "deploy").count(2));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.reason, ReasonCode::WorkflowCreated);
        assert_eq!(memory.reasons(), vec![ReasonCode::WorkflowCreated]);
    }
}
