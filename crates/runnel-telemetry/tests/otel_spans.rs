//! End-to-end checks of the OTel adapter: spans created through the tracker
//! and accumulator must export with correct linkage, attributes, and events.

use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{SpanId, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::Context;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use runnel_telemetry::{
    OtelTracer, ParentResolvers, ReasoningAccumulator, ReasoningConfig, SpanStackTracker,
    SpanTracer, RUN_SPAN_NAME, SEGMENT_SPAN_NAME,
};
use std::sync::Arc;

fn setup() -> (InMemorySpanExporter, SdkTracerProvider, Arc<OtelTracer>) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let tracer = OtelTracer::new(BoxedTracer::new(Box::new(provider.tracer("test"))));
    (exporter, provider, tracer)
}

fn find_attribute<'a>(span: &'a SpanData, key: &str) -> Option<&'a opentelemetry::Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

fn span_named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("expected span {name}"))
}

#[test]
fn segment_span_exports_summary_under_the_run_span() {
    let (exporter, provider, tracer) = setup();

    let tracker = SpanStackTracker::new(tracer.clone() as Arc<dyn SpanTracer>);
    let resolver_tracker = tracker.clone();
    let accumulator = ReasoningAccumulator::new(
        tracer.clone(),
        ParentResolvers::new().with(move || resolver_tracker.current_span()),
        ReasoningConfig::default().with_max_len(64),
    );

    let run = tracker.start_span(RUN_SPAN_NAME, vec![], None);
    accumulator.append("r1", "short reasoning");
    accumulator.end("r1", None);
    run.end();

    let _ = provider.force_flush();
    let exported = exporter.get_finished_spans().unwrap();

    let run_span = span_named(&exported, RUN_SPAN_NAME);
    let segment = span_named(&exported, SEGMENT_SPAN_NAME);

    // Linkage: same trace, segment parented under the run span.
    assert_eq!(
        segment.span_context.trace_id(),
        run_span.span_context.trace_id()
    );
    assert_eq!(segment.parent_span_id, run_span.span_context.span_id());

    // Summary attributes.
    assert_eq!(
        find_attribute(segment, "gen_ai.reasoning.length"),
        Some(&opentelemetry::Value::I64("short reasoning".len() as i64))
    );
    assert_eq!(
        find_attribute(segment, "gen_ai.reasoning.truncated"),
        Some(&opentelemetry::Value::Bool(false))
    );
    assert_eq!(
        find_attribute(segment, "gen_ai.reasoning.source")
            .map(|v| v.as_str().to_string()),
        Some("stream".to_string())
    );

    // Summary event carries the text.
    let event = segment
        .events
        .events
        .iter()
        .find(|event| event.name == "gen_ai.reasoning.summary")
        .expect("expected summary event");
    let text = event
        .attributes
        .iter()
        .find(|kv| kv.key.as_str() == "gen_ai.reasoning.text")
        .map(|kv| kv.value.as_str().to_string());
    assert_eq!(text.as_deref(), Some("short reasoning"));
}

#[test]
fn untracked_spans_are_roots_when_no_parent_is_given() {
    let (exporter, provider, tracer) = setup();

    let span = tracer.start_span("provider.call", vec![], None);
    span.end();

    let _ = provider.force_flush();
    let exported = exporter.get_finished_spans().unwrap();
    let exported_span = span_named(&exported, "provider.call");
    assert_eq!(exported_span.parent_span_id, SpanId::INVALID);
}

#[test]
fn explicit_parent_outlinks_through_the_handle() {
    let (exporter, provider, tracer) = setup();

    let parent = tracer.start_span("outer", vec![], None);
    let child = tracer.start_span("inner", vec![], Some(&parent));
    child.end();
    parent.end();

    let _ = provider.force_flush();
    let exported = exporter.get_finished_spans().unwrap();
    let outer = span_named(&exported, "outer");
    let inner = span_named(&exported, "inner");
    assert_eq!(inner.parent_span_id, outer.span_context.span_id());
    assert_eq!(
        inner.span_context.trace_id(),
        outer.span_context.trace_id()
    );
}

#[test]
fn ambient_active_span_is_used_as_last_resort_parent() {
    let (exporter, provider, tracer) = setup();

    let sdk_tracer = provider.tracer("ambient");
    let ambient = sdk_tracer.start("ambient-root");
    let cx = Context::current_with_span(ambient);
    let _guard = cx.clone().attach();

    assert!(tracer.active_span().is_some());
    let child = tracer.start_span("child-of-ambient", vec![], tracer.active_span().as_ref());
    child.end();
    drop(_guard);
    cx.span().end();

    let _ = provider.force_flush();
    let exported = exporter.get_finished_spans().unwrap();
    let root = span_named(&exported, "ambient-root");
    let child = span_named(&exported, "child-of-ambient");
    assert_eq!(child.parent_span_id, root.span_context.span_id());
}
