//! Event sinks.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::event::Event;
use crate::reason::{ReasonCode, Severity};

/// Receives rendered events. Emission never fails the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Mirrors events into the tracing log: Normal at info, Warning at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event.severity {
            Severity::Normal => info!(
                kind = %event.subject_kind,
                scope = %event.subject_scope,
                subject = %event.subject_name,
                reason = %event.reason,
                "{}",
                event.message
            ),
            Severity::Warning => warn!(
                kind = %event.subject_kind,
                scope = %event.subject_scope,
                subject = %event.subject_name,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Publishes events on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    /// Create a sink with a channel of `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &Event) {
        // No receivers is fine
        let _ = self.tx.send(event.clone());
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Reasons of every event so far, in order.
    pub fn reasons(&self) -> Vec<ReasonCode> {
        self.events.lock().iter().map(|e| e.reason).collect()
    }

    /// Events with `reason`.
    pub fn with_reason(&self, reason: ReasonCode) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards every event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
