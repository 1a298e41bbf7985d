//! Per-stream composition of telemetry and lifecycle.
//!
//! The host owns the provider call; this module owns the wiring around it:
//! a span-stack tracker and reasoning accumulator bundled per stream
//! ([`StreamTelemetry`]), and a driver that couples them with the lifecycle
//! so every terminal path also drains pending reasoning segments
//! ([`StreamDriver`]).

use crate::error::StreamRunError;
use crate::lifecycle::{ResolveStream, StreamLifecycle};
use futures::Stream;
use runnel_contract::{FinishEvent, StatusPatch, StreamPart};
use runnel_telemetry::{
    instrument_parts, ParentResolver, ParentResolvers, ReasoningAccumulator, ReasoningConfig,
    SpanStackTracker, SpanTracer,
};
use std::future::Future;
use std::sync::Arc;

/// Telemetry bundle for one stream: span-stack tracker plus reasoning
/// accumulator, wired so the tracker's current span is consulted first when
/// resolving parents.
pub struct StreamTelemetry {
    tracker: Arc<SpanStackTracker>,
    accumulator: Arc<ReasoningAccumulator>,
}

impl StreamTelemetry {
    pub fn new(tracer: Arc<dyn SpanTracer>, config: ReasoningConfig) -> Self {
        Self::with_parent_resolver(tracer, config, None)
    }

    /// `extra` is consulted after the tracker when resolving parents,
    /// typically the host's own outer span.
    pub fn with_parent_resolver(
        tracer: Arc<dyn SpanTracer>,
        config: ReasoningConfig,
        extra: Option<ParentResolver>,
    ) -> Self {
        let tracker = SpanStackTracker::new(tracer.clone());
        let tracker_for_resolver = tracker.clone();
        let mut resolvers = ParentResolvers::new().with(move || tracker_for_resolver.current_span());
        if let Some(extra) = extra {
            resolvers.push(extra);
        }
        let accumulator = Arc::new(ReasoningAccumulator::new(tracer, resolvers, config));
        accumulator.refresh_default_span();
        Self {
            tracker,
            accumulator,
        }
    }

    pub fn tracker(&self) -> &Arc<SpanStackTracker> {
        &self.tracker
    }

    pub fn accumulator(&self) -> &Arc<ReasoningAccumulator> {
        &self.accumulator
    }

    /// Apply the pass-through tap stage handling structural reasoning
    /// markers.
    pub fn instrument_parts<S>(&self, parts: S) -> impl Stream<Item = StreamPart>
    where
        S: Stream<Item = StreamPart>,
    {
        instrument_parts(parts, self.accumulator.clone())
    }

    /// Per-chunk observation point: refreshes the fallback parent and feeds
    /// reasoning deltas to the accumulator. Deltas are observed here rather
    /// than in the tap because the host pipeline does not route them through
    /// the same interception point as the structural markers.
    pub fn observe_chunk(&self, part: &StreamPart) {
        self.accumulator.refresh_default_span();
        if let StreamPart::ReasoningDelta { id, delta } = part {
            self.accumulator.append(id, delta);
        }
    }

    /// Finish callback: flush leftovers, then fall back to the aggregate
    /// reasoning text when the stream itself produced no summaries.
    pub fn on_finish(&self, event: &FinishEvent) {
        self.accumulator.handle_finish(event);
    }

    /// Drain every pending segment (error/abort callbacks, terminal safety
    /// net).
    pub fn flush(&self) {
        let current = self.accumulator.refresh_default_span();
        self.accumulator.flush_all(current);
    }
}

/// Couples one lifecycle with one telemetry bundle.
pub struct StreamDriver<R> {
    lifecycle: Arc<StreamLifecycle<R>>,
    telemetry: StreamTelemetry,
}

impl<R> StreamDriver<R> {
    pub fn new(lifecycle: Arc<StreamLifecycle<R>>, telemetry: StreamTelemetry) -> Self {
        Self {
            lifecycle,
            telemetry,
        }
    }

    pub fn lifecycle(&self) -> &Arc<StreamLifecycle<R>> {
        &self.lifecycle
    }

    pub fn telemetry(&self) -> &StreamTelemetry {
        &self.telemetry
    }

    /// Error callback: drain telemetry, book the failure, re-raise it.
    pub async fn on_stream_error(
        &self,
        error: Option<String>,
        extra: Option<StatusPatch>,
    ) -> Result<(), StreamRunError> {
        self.telemetry.flush();
        self.lifecycle.on_stream_error(error, extra).await
    }

    /// Abort callback: drain telemetry, book the cancellation, raise it.
    pub async fn on_stream_abort(
        &self,
        extra: Option<StatusPatch>,
    ) -> Result<(), StreamRunError> {
        self.telemetry.flush();
        self.lifecycle.on_stream_abort(extra).await
    }

    /// [`StreamLifecycle::resolve_stream`] with a final telemetry drain on
    /// the way out. The drain is a no-op when the stream callbacks already
    /// flushed.
    pub async fn resolve_stream<T, Fut, Pump>(
        &self,
        args: ResolveStream<Fut, Pump>,
    ) -> Result<T, StreamRunError>
    where
        Fut: Future<Output = Result<T, StreamRunError>>,
        Pump: Future<Output = ()>,
    {
        let outcome = self.lifecycle.resolve_stream(args).await;
        self.telemetry.flush();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusHandlers;
    use futures::StreamExt;
    use runnel_contract::{MemoryStatusSink, StepBatch, StepSerializer};
    use runnel_telemetry::testing::RecordingTracer;
    use runnel_telemetry::{RUN_SPAN_NAME, SEGMENT_SPAN_NAME};
    use serde_json::{json, Value};

    fn telemetry(tracer: &Arc<RecordingTracer>) -> StreamTelemetry {
        StreamTelemetry::new(
            tracer.clone(),
            ReasoningConfig::default().with_max_len(64),
        )
    }

    fn driver(
        tracer: &Arc<RecordingTracer>,
        sink: &MemoryStatusSink,
    ) -> StreamDriver<Value> {
        let serializer: Arc<dyn StepSerializer<Value>> =
            Arc::new(|_: &Value| StepBatch::default());
        let lifecycle = Arc::new(StreamLifecycle::new(
            StatusHandlers::new(Arc::new(sink.clone()), "stream-1"),
            serializer,
        ));
        StreamDriver::new(lifecycle, telemetry(tracer))
    }

    #[tokio::test]
    async fn segments_are_parented_under_the_tracked_run_span() {
        let tracer = RecordingTracer::new();
        let telemetry = telemetry(&tracer);

        let run = telemetry.tracker().start_span(RUN_SPAN_NAME, vec![], None);

        let parts = vec![
            StreamPart::reasoning_start("r1"),
            StreamPart::reasoning_delta("r1", "thinking hard"),
            StreamPart::reasoning_end("r1"),
        ];
        let tap = telemetry.instrument_parts(futures::stream::iter(parts));
        futures::pin_mut!(tap);
        while let Some(part) = tap.next().await {
            telemetry.observe_chunk(&part);
        }
        run.end();

        let segment = tracer.span_named(SEGMENT_SPAN_NAME).unwrap();
        assert_eq!(segment.parent_name(), Some(RUN_SPAN_NAME));
        assert_eq!(segment.events_named("gen_ai.reasoning.summary").len(), 1);
    }

    #[tokio::test]
    async fn finish_fallback_produces_a_finish_sourced_summary() {
        let tracer = RecordingTracer::new();
        let telemetry = telemetry(&tracer);

        // Entire stream without reasoning markers.
        let parts = vec![StreamPart::text_delta("t1", "plain answer")];
        let collected: Vec<StreamPart> = telemetry
            .instrument_parts(futures::stream::iter(parts))
            .collect()
            .await;
        for part in &collected {
            telemetry.observe_chunk(part);
        }
        assert!(!telemetry.accumulator().has_emitted());

        telemetry.on_finish(&FinishEvent {
            reasoning: vec![json!({"text": "because X"})],
        });

        let finish = tracer.span_named("reasoning.finish").unwrap();
        let events = finish.events_named("gen_ai.reasoning.summary");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].attribute("gen_ai.reasoning.text").unwrap().as_str(),
            Some("because X")
        );
        assert_eq!(
            events[0].attribute("gen_ai.reasoning.source").unwrap().as_str(),
            Some("finish")
        );
    }

    #[tokio::test]
    async fn error_callback_flushes_pending_segments_and_reraises() {
        let tracer = RecordingTracer::new();
        let sink = MemoryStatusSink::new();
        let driver = driver(&tracer, &sink);
        driver.lifecycle().start(None).await.unwrap();

        driver.telemetry().observe_chunk(&StreamPart::reasoning_delta("r1", "cut short"));

        let err = driver
            .on_stream_error(Some("connection reset".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamRunError::Provider(_)));

        // The mid-segment text still produced its summary.
        let segment = tracer.span_named(SEGMENT_SPAN_NAME).unwrap();
        assert_eq!(segment.events_named("gen_ai.reasoning.summary").len(), 1);
        assert!(segment.ended());
        assert_eq!(sink.last().unwrap().1["status"], "error");
    }

    #[tokio::test]
    async fn resolve_stream_drains_leftovers_on_the_way_out() {
        let tracer = RecordingTracer::new();
        let sink = MemoryStatusSink::new();
        let driver = driver(&tracer, &sink);
        driver.lifecycle().start(None).await.unwrap();

        driver.telemetry().observe_chunk(&StreamPart::reasoning_delta("r1", "left behind"));

        driver
            .resolve_stream(ResolveStream::new(async { Ok::<_, StreamRunError>(()) }))
            .await
            .unwrap();

        let segment = tracer.span_named(SEGMENT_SPAN_NAME).unwrap();
        assert!(segment.ended());
        assert_eq!(sink.last().unwrap().1["status"], "completed");
    }

    #[tokio::test]
    async fn extra_parent_resolver_is_consulted_after_the_tracker() {
        let tracer = RecordingTracer::new();
        let host_span = tracer.start_span("host.request", vec![], None);
        let host_clone = host_span.clone();
        let telemetry = StreamTelemetry::with_parent_resolver(
            tracer.clone(),
            ReasoningConfig::default(),
            Some(Arc::new(move || Some(host_clone.clone()))),
        );

        // No run/step span active: the extra resolver provides the parent.
        telemetry.accumulator().start("r1", None);
        let segment = tracer.span_named(SEGMENT_SPAN_NAME).unwrap();
        assert_eq!(segment.parent_name(), Some("host.request"));
    }
}
