//! Engine event bus — trait for emitting lifecycle events from the engine.
//!
//! Components accept an `Arc<dyn EventSink>` so events can be routed to an
//! analytics pipeline or customer webhooks without coupling the engine to them.

use crate::types::{EngineEvent, EventType};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Trait for emitting engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// No-op sink for tests and deployments without an event pipeline.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Sink that writes every event to the log at debug level.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: EngineEvent) {
        tracing::debug!(
            event_type = ?event.event_type,
            sequence_id = ?event.sequence_id,
            enrollment_id = ?event.enrollment_id,
            execution_id = ?event.execution_id,
            detail = event.detail.as_deref().unwrap_or_default(),
            "Engine event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

/// Builds an `EngineEvent` stamped with the emitting node and the time it happened.
pub fn make_event(
    node_id: &str,
    at: DateTime<Utc>,
    event_type: EventType,
    sequence_id: Option<Uuid>,
    enrollment_id: Option<Uuid>,
    execution_id: Option<Uuid>,
) -> EngineEvent {
    EngineEvent {
        event_id: Uuid::new_v4(),
        event_type,
        sequence_id,
        enrollment_id,
        execution_id,
        lead_id: None,
        detail: None,
        node_id: node_id.to_string(),
        timestamp: at,
    }
}

/// An event sink bound to the node that emits into it.
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    node_id: Arc<str>,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, node_id: impl Into<Arc<str>>) -> Self {
        Self {
            sink,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    pub fn event(
        &self,
        at: DateTime<Utc>,
        event_type: EventType,
        sequence_id: Option<Uuid>,
        enrollment_id: Option<Uuid>,
        execution_id: Option<Uuid>,
    ) -> EngineEvent {
        make_event(
            &self.node_id,
            at,
            event_type,
            sequence_id,
            enrollment_id,
            execution_id,
        )
    }

    pub fn publish(&self, event: EngineEvent) {
        self.sink.emit(event);
    }
}

/// Convenience: create a no-op event bus for components that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let sequence_id = Uuid::new_v4();
        sink.emit(make_event("node-a", Utc::now(), EventType::SequenceCreated, Some(sequence_id), None, None));
        sink.emit(make_event(
            "node-a",
            Utc::now(),
            EventType::EnrollmentCreated,
            Some(sequence_id),
            Some(Uuid::new_v4()),
            None,
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(EventType::SequenceCreated), 1);
        assert_eq!(sink.count_type(EventType::EnrollmentCreated), 1);

        let events = sink.events();
        assert_eq!(events[0].sequence_id, Some(sequence_id));
        assert!(events[1].enrollment_id.is_some());

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event("node-a", Utc::now(), EventType::ReplyReceived, None, None, None));
    }

    #[test]
    fn test_log_sink() {
        let sink: Arc<dyn EventSink> = Arc::new(LogSink);
        let mut event = make_event("node-a", Utc::now(), EventType::EnrollmentPaused, Some(Uuid::new_v4()), None, None);
        event.detail = Some("manual".into());
        sink.emit(event);
    }

    #[test]
    fn test_publisher_stamps_node_and_time() {
        use chrono::TimeZone;

        let sink = capture_sink();
        let publisher = EventPublisher::new(sink.clone(), "node-7");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let sequence_id = Uuid::new_v4();

        publisher.publish(publisher.event(at, EventType::SequenceCreated, Some(sequence_id), None, None));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node_id, "node-7");
        assert_eq!(events[0].timestamp, at);
        assert_eq!(events[0].sequence_id, Some(sequence_id));
        assert_eq!(publisher.node_id(), "node-7");
    }
}
