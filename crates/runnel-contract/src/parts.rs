use super::*;

/// Discriminated parts of a token stream.
///
/// Wire-compatible with the AI SDK UI message stream shapes (`kebab-case`
/// `type` tags). The runtime only inspects the reasoning markers and the
/// terminal events; everything else passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    /// Beginning of a text block.
    TextStart { id: String },

    /// Incremental text content.
    TextDelta { id: String, delta: String },

    /// End of a text block.
    TextEnd { id: String },

    /// Beginning of a reasoning segment.
    ReasoningStart { id: String },

    /// Incremental reasoning content for a segment.
    ReasoningDelta { id: String, delta: String },

    /// End of a reasoning segment.
    ReasoningEnd { id: String },

    /// Stream completion.
    Finish {
        #[serde(rename = "finishReason", skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },

    /// Stream-level error text.
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

impl StreamPart {
    /// Create a reasoning-start part.
    pub fn reasoning_start(id: impl Into<String>) -> Self {
        Self::ReasoningStart { id: id.into() }
    }

    /// Create a reasoning-delta part.
    pub fn reasoning_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ReasoningDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    /// Create a reasoning-end part.
    pub fn reasoning_end(id: impl Into<String>) -> Self {
        Self::ReasoningEnd { id: id.into() }
    }

    /// Create a text-delta part.
    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    /// Create a finish part.
    pub fn finish() -> Self {
        Self::Finish {
            finish_reason: None,
        }
    }
}

/// Terminal payload reported by the provider when generation finishes.
///
/// Some providers only surface reasoning here instead of streaming it
/// incrementally; the runtime uses this as a fallback source for a
/// consolidated summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinishEvent {
    /// Reasoning segments as reported by the provider. Entries are opaque
    /// values; only `{"text": "..."}`-shaped objects contribute text.
    #[serde(default)]
    pub reasoning: Vec<Value>,
}

impl FinishEvent {
    /// Concatenate the text of every conforming reasoning entry.
    ///
    /// Non-conforming entries (missing `text`, non-string `text`, non-object
    /// values) contribute nothing rather than failing the extraction.
    pub fn aggregate_reasoning_text(&self) -> String {
        self.reasoning
            .iter()
            .map(|part| part.get("text").and_then(Value::as_str).unwrap_or_default())
            .collect()
    }
}
