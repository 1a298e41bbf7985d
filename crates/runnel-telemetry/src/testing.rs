//! In-memory tracer for unit tests.
//!
//! Records every span it creates so tests can assert on attributes, events,
//! parentage, and end-state without a tracing backend. Consumed by this
//! crate's own tests and by downstream crates' tests.

use crate::trace::{AttrValue, SpanHandle, SpanRef, SpanTracer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// An event recorded on a [`RecordedSpan`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub name: &'static str,
    pub attributes: Vec<(&'static str, AttrValue)>,
}

impl RecordedEvent {
    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Span created by a [`RecordingTracer`].
pub struct RecordedSpan {
    name: String,
    parent_name: Option<String>,
    attributes: Mutex<Vec<(&'static str, AttrValue)>>,
    events: Mutex<Vec<RecordedEvent>>,
    ended: AtomicBool,
}

impl RecordedSpan {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the parent span this span was linked to at creation, if any.
    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        self.attributes.lock().unwrap().clone()
    }

    /// Last value recorded for `key`, if any.
    pub fn attribute(&self, key: &str) -> Option<AttrValue> {
        self.attributes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.name == name)
            .cloned()
            .collect()
    }
}

impl SpanHandle for RecordedSpan {
    fn set_attribute(&self, key: &'static str, value: AttrValue) {
        self.attributes.lock().unwrap().push((key, value));
    }

    fn add_event(&self, name: &'static str, attributes: Vec<(&'static str, AttrValue)>) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent { name, attributes });
    }

    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Tracer recording every span it creates, with a settable ambient span.
#[derive(Default)]
pub struct RecordingTracer {
    spans: Mutex<Vec<Arc<RecordedSpan>>>,
    ambient: Mutex<Option<SpanRef>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set (or clear) the span reported by [`SpanTracer::active_span`].
    pub fn set_ambient(&self, span: Option<SpanRef>) {
        *self.ambient.lock().unwrap() = span;
    }

    /// All spans created so far, in creation order.
    pub fn spans(&self) -> Vec<Arc<RecordedSpan>> {
        self.spans.lock().unwrap().clone()
    }

    /// First span created with `name`.
    pub fn span_named(&self, name: &str) -> Option<Arc<RecordedSpan>> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .find(|span| span.name == name)
            .cloned()
    }

    /// All spans created with `name`.
    pub fn spans_named(&self, name: &str) -> Vec<Arc<RecordedSpan>> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .filter(|span| span.name == name)
            .cloned()
            .collect()
    }

    pub fn span_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }
}

impl SpanTracer for RecordingTracer {
    fn start_span(
        &self,
        name: &str,
        attributes: Vec<(&'static str, AttrValue)>,
        parent: Option<&SpanRef>,
    ) -> SpanRef {
        let parent_name = parent.and_then(|span| {
            span.as_any()
                .downcast_ref::<RecordedSpan>()
                .map(|recorded| recorded.name.clone())
        });
        let span = Arc::new(RecordedSpan {
            name: name.to_string(),
            parent_name,
            attributes: Mutex::new(attributes),
            events: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        });
        self.spans.lock().unwrap().push(span.clone());
        span
    }

    fn active_span(&self) -> Option<SpanRef> {
        self.ambient.lock().unwrap().clone()
    }
}
