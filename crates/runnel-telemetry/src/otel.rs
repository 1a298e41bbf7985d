//! OpenTelemetry-backed implementation of the span contract.
//!
//! Adapts an OTel tracer to [`SpanTracer`]/[`SpanHandle`]. Parent linkage
//! travels through the handles' downcast hook, so it survives wrapping (e.g.
//! the span-stack tracker's tracked spans). Failures on this path are
//! contained here and never surface to callers.

use crate::trace::{AttrValue, SpanHandle, SpanRef, SpanTracer};
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{Span, SpanContext, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use std::sync::{Arc, Mutex};

fn key_value(key: &'static str, value: AttrValue) -> KeyValue {
    match value {
        AttrValue::String(value) => KeyValue::new(key, value),
        AttrValue::I64(value) => KeyValue::new(key, value),
        AttrValue::Bool(value) => KeyValue::new(key, value),
    }
}

fn key_values(attributes: Vec<(&'static str, AttrValue)>) -> Vec<KeyValue> {
    attributes
        .into_iter()
        .map(|(key, value)| key_value(key, value))
        .collect()
}

/// [`SpanTracer`] over an OpenTelemetry tracer.
pub struct OtelTracer {
    tracer: BoxedTracer,
}

impl OtelTracer {
    pub fn new(tracer: BoxedTracer) -> Arc<Self> {
        Arc::new(Self { tracer })
    }

    /// Tracer from the globally installed provider.
    pub fn named(name: &'static str) -> Arc<Self> {
        Self::new(global::tracer(name))
    }
}

impl SpanTracer for OtelTracer {
    fn start_span(
        &self,
        name: &str,
        attributes: Vec<(&'static str, AttrValue)>,
        parent: Option<&SpanRef>,
    ) -> SpanRef {
        let builder = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(SpanKind::Internal)
            .with_attributes(key_values(attributes));
        let parent_cx = parent
            .and_then(parent_context)
            .unwrap_or_else(Context::current);
        let span = builder.start_with_context(&self.tracer, &parent_cx);
        Arc::new(OtelSpan::new(span))
    }

    fn active_span(&self) -> Option<SpanRef> {
        let cx = Context::current();
        if cx.has_active_span() {
            Some(Arc::new(AmbientSpan { cx }))
        } else {
            None
        }
    }
}

/// Resolve a handle back to an OTel context suitable for parenting.
fn parent_context(parent: &SpanRef) -> Option<Context> {
    let any = parent.as_any();
    let span_context = if let Some(span) = any.downcast_ref::<OtelSpan>() {
        span.span_context.clone()
    } else if let Some(ambient) = any.downcast_ref::<AmbientSpan>() {
        ambient.cx.span().span_context().clone()
    } else {
        return None;
    };
    if !span_context.is_valid() {
        return None;
    }
    Some(Context::new().with_remote_span_context(span_context))
}

/// Handle owning a live OTel span.
pub struct OtelSpan {
    span_context: SpanContext,
    span: Mutex<BoxedSpan>,
}

impl OtelSpan {
    fn new(span: BoxedSpan) -> Self {
        let span_context = span.span_context().clone();
        Self {
            span_context,
            span: Mutex::new(span),
        }
    }
}

impl SpanHandle for OtelSpan {
    fn set_attribute(&self, key: &'static str, value: AttrValue) {
        if let Ok(mut span) = self.span.lock() {
            span.set_attribute(key_value(key, value));
        }
    }

    fn add_event(&self, name: &'static str, attributes: Vec<(&'static str, AttrValue)>) {
        if let Ok(mut span) = self.span.lock() {
            span.add_event(name, key_values(attributes));
        }
    }

    fn end(&self) {
        // The SDK ignores a second end; a poisoned lock is dropped silently
        // rather than propagated into the data path.
        if let Ok(mut span) = self.span.lock() {
            span.end();
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The backend's ambient active span, captured from the current context.
/// Used as a last-resort parent and as an event target; its lifetime belongs
/// to whoever activated it, so [`end`](SpanHandle::end) is forwarded verbatim.
struct AmbientSpan {
    cx: Context,
}

impl SpanHandle for AmbientSpan {
    fn set_attribute(&self, key: &'static str, value: AttrValue) {
        self.cx.span().set_attribute(key_value(key, value));
    }

    fn add_event(&self, name: &'static str, attributes: Vec<(&'static str, AttrValue)>) {
        self.cx.span().add_event(name, key_values(attributes));
    }

    fn end(&self) {
        self.cx.span().end();
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
