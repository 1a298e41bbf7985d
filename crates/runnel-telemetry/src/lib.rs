//! Stream telemetry: span-stack tracking and reasoning summarization.
//!
//! Token-generation providers interleave "reasoning" segments into the token
//! stream as high-frequency deltas with no call stack to hang tracing spans
//! on. This crate reconstructs the effective span nesting for one stream
//! ([`SpanStackTracker`]), folds each segment's deltas into exactly one
//! summary emission ([`ReasoningAccumulator`]), and observes the stream
//! without touching it ([`instrument_parts`]).
//!
//! Everything here is best-effort by construction: the span contract
//! ([`SpanHandle`]/[`SpanTracer`]) is infallible, so observability can never
//! corrupt or abort the primary data path. The production backend is
//! OpenTelemetry ([`OtelTracer`]); tests use [`testing::RecordingTracer`].

pub mod accumulator;
pub mod otel;
pub mod span_stack;
pub mod tap;
pub mod testing;
pub mod trace;

pub use accumulator::{
    ReasoningAccumulator, ReasoningConfig, SummarySource, DEFAULT_BUFFER_FACTOR,
    DEFAULT_MAX_SUMMARY_LEN, FINISH_SPAN_NAME, SEGMENT_SPAN_NAME,
};
pub use otel::OtelTracer;
pub use span_stack::{SpanStackTracker, RUN_SPAN_NAME, STEP_SPAN_NAME};
pub use tap::instrument_parts;
pub use trace::{
    same_span, AttrValue, ParentResolver, ParentResolvers, SpanHandle, SpanRef, SpanTracer,
};
