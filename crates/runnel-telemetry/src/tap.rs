//! Transparent telemetry stage for the provider part stream.

use crate::accumulator::ReasoningAccumulator;
use futures::{Stream, StreamExt};
use runnel_contract::StreamPart;
use std::sync::Arc;

/// Wrap `parts` in a pass-through stage that drives `accumulator` from the
/// structural reasoning markers and flushes leftovers when the stream ends.
///
/// Every part is yielded unchanged and in order; the stage only observes.
/// `reasoning-start` opens the segment, `reasoning-end` emits it, and stream
/// completion flushes any segment whose end marker never arrived (e.g. the
/// stream terminated mid-segment). Text deltas are deliberately NOT consumed
/// here: the host pipeline does not guarantee that deltas and structural
/// markers are observable from one interception point, so deltas reach the
/// accumulator through the driver's per-chunk observer instead.
pub fn instrument_parts<S>(
    parts: S,
    accumulator: Arc<ReasoningAccumulator>,
) -> impl Stream<Item = StreamPart>
where
    S: Stream<Item = StreamPart>,
{
    async_stream::stream! {
        futures::pin_mut!(parts);
        accumulator.refresh_default_span();
        while let Some(part) = parts.next().await {
            let current = accumulator.refresh_default_span();
            match &part {
                StreamPart::ReasoningStart { id } => accumulator.start(id, current),
                StreamPart::ReasoningEnd { id } => accumulator.end(id, current),
                _ => {}
            }
            yield part;
        }
        let current = accumulator.refresh_default_span();
        accumulator.flush_all(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{ReasoningConfig, SEGMENT_SPAN_NAME};
    use crate::testing::RecordingTracer;
    use crate::trace::ParentResolvers;

    fn accumulator(tracer: &Arc<RecordingTracer>) -> Arc<ReasoningAccumulator> {
        Arc::new(ReasoningAccumulator::new(
            tracer.clone(),
            ParentResolvers::new(),
            ReasoningConfig::default(),
        ))
    }

    #[tokio::test]
    async fn passes_every_part_through_unchanged() {
        let tracer = RecordingTracer::new();
        let acc = accumulator(&tracer);

        let input = vec![
            StreamPart::text_delta("t1", "hello"),
            StreamPart::reasoning_start("r1"),
            StreamPart::reasoning_delta("r1", "hmm"),
            StreamPart::reasoning_end("r1"),
            StreamPart::finish(),
        ];
        let output: Vec<StreamPart> =
            instrument_parts(futures::stream::iter(input.clone()), acc)
                .collect()
                .await;
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn markers_open_and_emit_segments() {
        let tracer = RecordingTracer::new();
        let acc = accumulator(&tracer);

        let input = vec![
            StreamPart::reasoning_start("r1"),
            StreamPart::reasoning_end("r1"),
        ];
        // Deltas arrive through the chunk observer, not the tap.
        let tap = instrument_parts(futures::stream::iter(input), acc.clone());
        futures::pin_mut!(tap);
        tap.next().await;
        acc.append("r1", "observed elsewhere");
        tap.next().await;

        let span = tracer.span_named(SEGMENT_SPAN_NAME).unwrap();
        assert_eq!(span.events_named("gen_ai.reasoning.summary").len(), 1);
        assert!(span.ended());
    }

    #[tokio::test]
    async fn completion_flushes_segments_missing_their_end() {
        let tracer = RecordingTracer::new();
        let acc = accumulator(&tracer);

        let input = vec![StreamPart::reasoning_start("r1")];
        let tap = instrument_parts(futures::stream::iter(input), acc.clone());
        futures::pin_mut!(tap);
        tap.next().await;
        acc.append("r1", "partial reasoning");
        // Upstream ends without a reasoning-end marker.
        assert!(tap.next().await.is_none());

        let span = tracer.span_named(SEGMENT_SPAN_NAME).unwrap();
        let events = span.events_named("gen_ai.reasoning.summary");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].attribute("gen_ai.reasoning.text").unwrap().as_str(),
            Some("partial reasoning")
        );
    }

    #[tokio::test]
    async fn ignores_unrelated_parts() {
        let tracer = RecordingTracer::new();
        let acc = accumulator(&tracer);

        let input = vec![
            StreamPart::text_delta("t1", "a"),
            StreamPart::text_delta("t1", "b"),
            StreamPart::finish(),
        ];
        let _: Vec<StreamPart> = instrument_parts(futures::stream::iter(input), acc.clone())
            .collect()
            .await;
        assert_eq!(tracer.span_count(), 0);
        assert!(!acc.has_emitted());
    }
}
