//! Span-stack bookkeeping: answers "what span should new children be
//! parented to, right now?".
//!
//! Generation providers expose no call stack to attach spans to concurrently
//! nested sub-operations, so the tracker reconstructs the effective nesting
//! by interposing on creation and completion of the two span names that
//! matter: the outer run span and the inner per-step span. All other spans
//! pass through untouched. One tracker instance belongs to one active stream;
//! nothing here is global.

use crate::trace::{AttrValue, SpanHandle, SpanRef, SpanTracer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Name of the outer run span, covering the whole generation.
pub const RUN_SPAN_NAME: &str = "stream.run";

/// Name of the inner per-step span, covering one provider call.
pub const STEP_SPAN_NAME: &str = "stream.run.step";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Run,
    Step,
}

fn lane_for(name: &str) -> Option<Lane> {
    match name {
        RUN_SPAN_NAME => Some(Lane::Run),
        STEP_SPAN_NAME => Some(Lane::Step),
        _ => None,
    }
}

struct StackEntry {
    id: u64,
    span: SpanRef,
}

#[derive(Default)]
struct Stacks {
    run: Vec<StackEntry>,
    step: Vec<StackEntry>,
}

impl Stacks {
    fn lane_mut(&mut self, lane: Lane) -> &mut Vec<StackEntry> {
        match lane {
            Lane::Run => &mut self.run,
            Lane::Step => &mut self.step,
        }
    }
}

/// Tracks the active run/step spans of one stream.
pub struct SpanStackTracker {
    tracer: Arc<dyn SpanTracer>,
    stacks: Mutex<Stacks>,
    next_id: AtomicU64,
    weak_self: Weak<Self>,
}

impl SpanStackTracker {
    pub fn new(tracer: Arc<dyn SpanTracer>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            tracer,
            stacks: Mutex::new(Stacks::default()),
            next_id: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    pub fn tracer(&self) -> &Arc<dyn SpanTracer> {
        &self.tracer
    }

    /// Start a span through the injected tracer.
    ///
    /// Run/step spans are captured onto their stack and returned wrapped:
    /// ending the returned span ends the real one and removes that exact
    /// instance from its stack, tolerating out-of-order completion.
    /// Unrecognized names are passed through untracked.
    pub fn start_span(
        &self,
        name: &str,
        attributes: Vec<(&'static str, AttrValue)>,
        parent: Option<&SpanRef>,
    ) -> SpanRef {
        let span = self.tracer.start_span(name, attributes, parent);
        match lane_for(name) {
            Some(lane) => self.capture(lane, span),
            None => span,
        }
    }

    /// Same capture/wrap behavior, scoped around a callback: the span is
    /// handed to `f` and tracked until its `end` is called.
    pub fn start_active_span<T>(
        &self,
        name: &str,
        attributes: Vec<(&'static str, AttrValue)>,
        parent: Option<&SpanRef>,
        f: impl FnOnce(&SpanRef) -> T,
    ) -> T {
        let span = self.start_span(name, attributes, parent);
        f(&span)
    }

    /// Top of the step stack, else top of the run stack, else nothing.
    ///
    /// Steps nest inside the run, so they win as the immediate parent.
    pub fn current_span(&self) -> Option<SpanRef> {
        let stacks = self.stacks.lock().unwrap();
        stacks
            .step
            .last()
            .or_else(|| stacks.run.last())
            .map(|entry| entry.span.clone())
    }

    fn capture(&self, lane: Lane, span: SpanRef) -> SpanRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracked: SpanRef = Arc::new(TrackedSpan {
            id,
            lane,
            inner: span,
            tracker: self.weak_self.clone(),
        });
        self.stacks.lock().unwrap().lane_mut(lane).push(StackEntry {
            id,
            span: tracked.clone(),
        });
        tracked
    }

    fn release(&self, lane: Lane, id: u64) {
        let mut stacks = self.stacks.lock().unwrap();
        let stack = stacks.lane_mut(lane);
        if let Some(index) = stack.iter().rposition(|entry| entry.id == id) {
            stack.remove(index);
        }
    }
}

/// Wrapper composing pop-after-end onto a tracked span.
///
/// Holds the real span and exposes its own `end` which calls through and then
/// removes the span from its stack, so end and removal are one operation from
/// the caller's perspective.
struct TrackedSpan {
    id: u64,
    lane: Lane,
    inner: SpanRef,
    tracker: Weak<SpanStackTracker>,
}

impl SpanHandle for TrackedSpan {
    fn set_attribute(&self, key: &'static str, value: AttrValue) {
        self.inner.set_attribute(key, value);
    }

    fn add_event(&self, name: &'static str, attributes: Vec<(&'static str, AttrValue)>) {
        self.inner.add_event(name, attributes);
    }

    fn end(&self) {
        self.inner.end();
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.release(self.lane, self.id);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        // Forwarded so backends can link children through the wrapper.
        self.inner.as_any()
    }
}
