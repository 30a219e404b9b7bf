//! Fire-and-forget audit notifications.
//!
//! The engine reports noteworthy conditions (flow denials, policy exceptions,
//! skipped stages) through `EventSink`. Sinks must never block or fail the
//! caller; a broken audit backend must not break a login.

use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    FlowDenied,
    StageSkipped,
    PolicyException,
    StageException,
    PlanCorrupted,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub flow_slug: Option<String>,
    pub username: Option<String>,
    pub message: String,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            flow_slug: None,
            username: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_flow(mut self, slug: impl Into<String>) -> Self {
        self.flow_slug = Some(slug.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Audit delivery abstraction. `notify` is fire-and-forget.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: Event);
}

/// Default sink that emits structured log lines instead of persisting events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn notify(&self, event: Event) {
        match event.kind {
            EventKind::FlowDenied | EventKind::PolicyException | EventKind::StageException => {
                warn!(
                    kind = ?event.kind,
                    flow = event.flow_slug.as_deref().unwrap_or("-"),
                    username = event.username.as_deref().unwrap_or("-"),
                    "{}",
                    event.message
                );
            }
            EventKind::StageSkipped | EventKind::PlanCorrupted => {
                info!(
                    kind = ?event.kind,
                    flow = event.flow_slug.as_deref().unwrap_or("-"),
                    username = event.username.as_deref().unwrap_or("-"),
                    "{}",
                    event.message
                );
            }
        }
    }
}

/// Sink that records events in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|event| event.kind).collect()
    }
}

impl EventSink for CollectingEventSink {
    fn notify(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_events() {
        let sink = CollectingEventSink::new();
        sink.notify(Event::new(EventKind::FlowDenied, "flow denied").with_flow("login"));
        sink.notify(Event::new(EventKind::StageSkipped, "stage skipped").with_username("alice"));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].flow_slug.as_deref(), Some("login"));
        assert_eq!(events[1].username.as_deref(), Some("alice"));
        assert_eq!(
            sink.kinds(),
            vec![EventKind::FlowDenied, EventKind::StageSkipped]
        );
    }

    #[test]
    fn tracing_sink_never_fails() {
        let sink = TracingEventSink;
        sink.notify(Event::new(EventKind::PolicyException, "boom"));
        sink.notify(Event::new(EventKind::PlanCorrupted, "stale plan"));
    }
}
