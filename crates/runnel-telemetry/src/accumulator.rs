//! Reasoning-segment accumulation.
//!
//! Converts a high-frequency stream of small reasoning deltas into exactly
//! one summary emission per logical segment: a structured log line plus a
//! span event, attributes, and span end. Segments may start, append, and end
//! out of order relative to lifecycle events; leftovers are drained by
//! [`ReasoningAccumulator::flush_all`] at terminal time.

use crate::trace::{AttrValue, ParentResolvers, SpanRef, SpanTracer};
use runnel_contract::FinishEvent;
use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Default cap on summary text carried in events and logs, in bytes.
pub const DEFAULT_MAX_SUMMARY_LEN: usize = 2048;

/// Default live-buffer multiplier: buffers are trimmed to the trailing
/// `buffer_factor * max_len` bytes, bounding memory for pathologically long
/// segments while keeping a useful tail for the summary.
pub const DEFAULT_BUFFER_FACTOR: usize = 4;

/// Span name for one reasoning segment.
pub const SEGMENT_SPAN_NAME: &str = "reasoning.segment";

/// Span name for the consolidated finish-time summary.
pub const FINISH_SPAN_NAME: &str = "reasoning.finish";

/// Segment id used for the consolidated finish-time summary.
pub const FINISH_SEGMENT_ID: &str = "step";

/// Where a summary was observed: incrementally on the stream, or from the
/// provider's finish payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    Stream,
    Finish,
}

impl SummarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Finish => "finish",
        }
    }
}

/// Limits and labeling for reasoning summaries.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Maximum bytes of text carried on the emitted summary.
    pub max_len: usize,
    /// Live buffers are trimmed to the trailing `buffer_factor * max_len`
    /// bytes.
    pub buffer_factor: usize,
    /// Optional prefix for summary log lines.
    pub log_label: Option<String>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_SUMMARY_LEN,
            buffer_factor: DEFAULT_BUFFER_FACTOR,
            log_label: None,
        }
    }
}

impl ReasoningConfig {
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_buffer_factor(mut self, buffer_factor: usize) -> Self {
        self.buffer_factor = buffer_factor;
        self
    }

    pub fn with_log_label(mut self, log_label: impl Into<String>) -> Self {
        self.log_label = Some(log_label.into());
        self
    }
}

struct Entry {
    text: String,
    span: Option<SpanRef>,
    /// Non-owning parent candidate, used only when creating the span.
    parent: Option<SpanRef>,
    span_ended: bool,
}

impl Entry {
    fn new(parent: Option<SpanRef>) -> Self {
        Self {
            text: String::new(),
            span: None,
            parent,
            span_ended: false,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    default_parent: Option<SpanRef>,
    emitted: bool,
}

/// Per-stream reasoning accumulator.
///
/// At most one entry exists per segment id; the entry is removed as soon as
/// its summary is emitted. A later `append` for the same id starts a fresh
/// segment instance reusing the id (whether that should instead be rejected
/// is a host-level product decision; the provider wire format permits it).
pub struct ReasoningAccumulator {
    tracer: Arc<dyn SpanTracer>,
    resolvers: ParentResolvers,
    config: ReasoningConfig,
    inner: Mutex<Inner>,
}

impl ReasoningAccumulator {
    pub fn new(
        tracer: Arc<dyn SpanTracer>,
        resolvers: ParentResolvers,
        config: ReasoningConfig,
    ) -> Self {
        Self {
            tracer,
            resolvers,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Record a fallback parent and backfill entries that lack one.
    pub fn set_default_span(&self, span: Option<SpanRef>) {
        let candidate = span.or_else(|| self.resolvers.resolve());
        let Some(candidate) = candidate else {
            return;
        };
        let mut inner = self.inner.lock().unwrap();
        for entry in inner.entries.values_mut() {
            if entry.parent.is_none() {
                entry.parent = Some(candidate.clone());
            }
        }
        inner.default_parent = Some(candidate);
    }

    /// The current fallback parent, if any.
    pub fn default_span(&self) -> Option<SpanRef> {
        self.inner.lock().unwrap().default_parent.clone()
    }

    /// Re-derive the fallback parent from the resolver chain and the ambient
    /// active span, keeping the previous value when nothing newer is found.
    /// Returns the span considered current.
    pub fn refresh_default_span(&self) -> Option<SpanRef> {
        let candidate = self
            .resolvers
            .resolve()
            .or_else(|| self.tracer.active_span())
            .or_else(|| self.default_span());
        if let Some(span) = &candidate {
            self.set_default_span(Some(span.clone()));
        }
        candidate
    }

    /// Ensure an entry and a live span exist for `id`.
    pub fn start(&self, id: &str, hint: Option<SpanRef>) {
        let mut inner = self.inner.lock().unwrap();
        let Inner {
            entries,
            default_parent,
            ..
        } = &mut *inner;
        let entry = get_or_create(
            entries,
            default_parent,
            &self.tracer,
            &self.resolvers,
            id,
            hint.as_ref(),
        );
        ensure_span(
            &self.tracer,
            &self.resolvers,
            default_parent,
            id,
            entry,
            hint.as_ref(),
        );
    }

    /// Append a delta to the segment's buffer, trimming to the trailing
    /// window. Empty deltas are ignored entirely.
    pub fn append(&self, id: &str, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let resolved = self.resolvers.resolve();
        let mut inner = self.inner.lock().unwrap();
        let Inner {
            entries,
            default_parent,
            ..
        } = &mut *inner;
        let entry = get_or_create(
            entries,
            default_parent,
            &self.tracer,
            &self.resolvers,
            id,
            None,
        );
        ensure_span(
            &self.tracer,
            &self.resolvers,
            default_parent,
            id,
            entry,
            resolved.as_ref(),
        );
        entry.text.push_str(delta);
        let cap = self.config.max_len * self.config.buffer_factor;
        if entry.text.len() > cap {
            entry.text = tail_window(&entry.text, cap).to_string();
        }
    }

    /// Emit the segment's summary and remove its entry. A second `end` for
    /// the same id, or an `end` for an id that never started, is a no-op.
    pub fn end(&self, id: &str, hint: Option<SpanRef>) {
        let hint = hint.or_else(|| self.resolvers.resolve());
        let mut inner = self.inner.lock().unwrap();
        self.emit_locked(&mut inner, id, hint);
    }

    /// Emit every remaining entry. Terminal drain: order across segment ids
    /// is not significant.
    pub fn flush_all(&self, hint: Option<SpanRef>) {
        let hint = hint.or_else(|| self.resolvers.resolve());
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = inner.entries.keys().cloned().collect();
        for id in ids {
            self.emit_locked(&mut inner, &id, hint.clone());
        }
    }

    /// True once at least one segment produced a non-empty emission.
    pub fn has_emitted(&self) -> bool {
        self.inner.lock().unwrap().emitted
    }

    /// Finish-time fallback: flush leftovers, then, if the stream never
    /// produced a summary but the finish payload carries aggregate reasoning
    /// text, emit one consolidated `finish`-sourced summary. The summary
    /// lands on the resolved current span when one exists (left open for its
    /// owner to end); otherwise a fresh span is created and ended here.
    pub fn handle_finish(&self, event: &FinishEvent) {
        let resolved = self
            .resolvers
            .resolve()
            .or_else(|| self.tracer.active_span())
            .or_else(|| self.default_span());
        self.flush_all(resolved.clone());
        if self.has_emitted() {
            return;
        }
        let text = event.aggregate_reasoning_text();
        if text.trim().is_empty() {
            return;
        }
        let (span, created) = match resolved {
            Some(span) => (span, false),
            None => {
                let parent = self
                    .resolvers
                    .resolve()
                    .or_else(|| self.tracer.active_span());
                let span = self.tracer.start_span(
                    FINISH_SPAN_NAME,
                    vec![("gen_ai.reasoning.id", FINISH_SEGMENT_ID.into())],
                    parent.as_ref(),
                );
                (span, true)
            }
        };
        emit_summary(
            &span,
            FINISH_SEGMENT_ID,
            &text,
            SummarySource::Finish,
            &self.config,
        );
        if created {
            span.end();
        }
    }

    fn emit_locked(&self, inner: &mut Inner, id: &str, hint: Option<SpanRef>) {
        let Inner {
            entries,
            default_parent,
            emitted,
        } = inner;
        let Some(mut entry) = entries.remove(id) else {
            return;
        };
        let span = ensure_span(
            &self.tracer,
            &self.resolvers,
            default_parent,
            id,
            &mut entry,
            hint.as_ref(),
        );
        finalize(
            &mut entry,
            id,
            &span,
            SummarySource::Stream,
            &self.config,
            emitted,
        );
    }
}

fn get_or_create<'a>(
    entries: &'a mut HashMap<String, Entry>,
    default_parent: &Option<SpanRef>,
    tracer: &Arc<dyn SpanTracer>,
    resolvers: &ParentResolvers,
    id: &str,
    hint: Option<&SpanRef>,
) -> &'a mut Entry {
    match entries.entry(id.to_string()) {
        hash_map::Entry::Occupied(slot) => {
            let entry = slot.into_mut();
            if entry.parent.is_none() {
                entry.parent = hint.cloned();
            }
            entry
        }
        hash_map::Entry::Vacant(slot) => {
            let parent = hint
                .cloned()
                .or_else(|| resolvers.resolve())
                .or_else(|| default_parent.clone())
                .or_else(|| tracer.active_span());
            slot.insert(Entry::new(parent))
        }
    }
}

fn ensure_span(
    tracer: &Arc<dyn SpanTracer>,
    resolvers: &ParentResolvers,
    default_parent: &Option<SpanRef>,
    id: &str,
    entry: &mut Entry,
    hint: Option<&SpanRef>,
) -> SpanRef {
    if let Some(span) = &entry.span {
        if !entry.span_ended {
            return span.clone();
        }
    }
    let parent = hint
        .cloned()
        .or_else(|| entry.parent.clone())
        .or_else(|| resolvers.resolve())
        .or_else(|| default_parent.clone())
        .or_else(|| tracer.active_span());
    let span = tracer.start_span(
        SEGMENT_SPAN_NAME,
        vec![("gen_ai.reasoning.id", id.into())],
        parent.as_ref(),
    );
    entry.span = Some(span.clone());
    entry.span_ended = false;
    if entry.parent.is_none() {
        entry.parent = parent;
    }
    span
}

fn finalize(
    entry: &mut Entry,
    id: &str,
    span: &SpanRef,
    source: SummarySource,
    config: &ReasoningConfig,
    emitted: &mut bool,
) {
    if entry.span_ended {
        return;
    }
    if entry.text.trim().is_empty() {
        // Close the span without a full summary; zero-content spans are
        // noise, but the resource still has to be released.
        span.add_event(
            "gen_ai.reasoning.empty",
            vec![
                ("gen_ai.reasoning.id", id.into()),
                ("gen_ai.reasoning.source", source.as_str().into()),
            ],
        );
        span.end();
        entry.span_ended = true;
        return;
    }
    emit_summary(span, id, &entry.text, source, config);
    span.end();
    entry.span_ended = true;
    *emitted = true;
}

fn emit_summary(
    span: &SpanRef,
    id: &str,
    text: &str,
    source: SummarySource,
    config: &ReasoningConfig,
) {
    let truncated = text.len() > config.max_len;
    let event_text = if truncated {
        format!("{}...", truncate_to_boundary(text, config.max_len))
    } else {
        text.to_string()
    };
    let prefix = config
        .log_label
        .as_deref()
        .map(|label| format!("{label} "))
        .unwrap_or_default();
    tracing::info!(
        gen_ai.reasoning.id = %id,
        gen_ai.reasoning.length = text.len(),
        gen_ai.reasoning.truncated = truncated,
        gen_ai.reasoning.source = source.as_str(),
        preview = %truncate_to_boundary(&event_text, 200),
        "{prefix}reasoning summary"
    );
    span.add_event(
        "gen_ai.reasoning.summary",
        vec![
            ("gen_ai.reasoning.id", id.into()),
            ("gen_ai.reasoning.length", text.len().into()),
            ("gen_ai.reasoning.truncated", truncated.into()),
            ("gen_ai.reasoning.text", event_text.into()),
            ("gen_ai.reasoning.source", source.as_str().into()),
        ],
    );
    span.set_attribute("gen_ai.reasoning.id", id.into());
    span.set_attribute("gen_ai.reasoning.length", text.len().into());
    span.set_attribute("gen_ai.reasoning.truncated", truncated.into());
    span.set_attribute("gen_ai.reasoning.source", source.as_str().into());
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a
/// character.
fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Trailing window of at most `max` bytes, starting at a character boundary.
fn tail_window(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
