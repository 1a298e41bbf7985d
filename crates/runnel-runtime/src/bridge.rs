//! Consumer-facing bridge from a run subscription to a chunk stream.
//!
//! A run subscription multiplexes named chunk streams with run-status
//! updates. The bridge forwards the chunks of one stream key, stops as soon
//! as the run reaches a terminal status, and releases the upstream
//! subscription on every exit path: natural completion, terminal cutoff, or
//! the consumer dropping its read side mid-stream.

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// One part observed on a run subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStreamPart {
    /// A chunk published on a named stream. `chunk` is absent when the
    /// publisher sent a malformed part.
    Chunk {
        stream_key: String,
        chunk: Option<Value>,
    },
    /// A run status update.
    Status { status: String },
}

/// Run statuses that terminate the bridge.
pub fn default_terminal_statuses() -> HashSet<String> {
    ["COMPLETED", "FAILED", "CANCELED"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Options for [`bridge_run_stream`].
pub struct BridgeOptions {
    stream_key: String,
    terminal_statuses: HashSet<String>,
    subscription: Option<CancellationToken>,
}

impl BridgeOptions {
    pub fn new(stream_key: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            terminal_statuses: default_terminal_statuses(),
            subscription: None,
        }
    }

    pub fn with_terminal_statuses(
        mut self,
        statuses: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.terminal_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Token owning the upstream subscription; cancelled when the bridge
    /// stream is dropped or finishes.
    pub fn with_subscription(mut self, token: CancellationToken) -> Self {
        self.subscription = Some(token);
        self
    }
}

/// Adapt `subscription` into a stream of this key's chunks.
pub fn bridge_run_stream<S>(
    subscription: S,
    options: BridgeOptions,
) -> impl Stream<Item = Value>
where
    S: Stream<Item = RunStreamPart>,
{
    let BridgeOptions {
        stream_key: wanted_key,
        terminal_statuses,
        subscription: token,
    } = options;
    let guard = token.map(CancellationToken::drop_guard);
    async_stream::stream! {
        // Dropped on every exit path, releasing the subscription.
        let _guard = guard;
        futures::pin_mut!(subscription);
        while let Some(part) = subscription.next().await {
            match part {
                RunStreamPart::Chunk { stream_key, chunk } => {
                    if stream_key != wanted_key {
                        continue;
                    }
                    match chunk {
                        Some(chunk) => {
                            tracing::debug!(
                                stream_key = %stream_key,
                                summary = %chunk_summary(&chunk),
                                "forwarding chunk"
                            );
                            yield chunk;
                        }
                        None => {
                            tracing::warn!(stream_key = %stream_key, "stream part missing chunk");
                        }
                    }
                }
                RunStreamPart::Status { status } => {
                    if terminal_statuses.contains(&status) {
                        tracing::debug!(status = %status, "terminating on run status");
                        break;
                    }
                }
            }
        }
    }
}

/// Compact representation of a chunk for debug logs.
fn chunk_summary(value: &Value) -> String {
    match value {
        Value::String(text) => text.chars().take(120).collect(),
        Value::Object(map) => {
            let mut summary = serde_json::Map::new();
            if let Some(kind) = map.get("type").and_then(Value::as_str) {
                summary.insert("type".to_string(), Value::from(kind));
            }
            if let Some(event) = map.get("event").and_then(Value::as_str) {
                summary.insert("event".to_string(), Value::from(event));
            }
            if map.contains_key("data") {
                summary.insert("has_data".to_string(), Value::Bool(true));
            }
            Value::Object(summary).to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(key: &str, value: Value) -> RunStreamPart {
        RunStreamPart::Chunk {
            stream_key: key.to_string(),
            chunk: Some(value),
        }
    }

    #[tokio::test]
    async fn forwards_only_the_requested_stream_key() {
        let parts = vec![
            chunk("ui", json!({"type": "text-delta", "delta": "a"})),
            chunk("metrics", json!({"tokens": 5})),
            chunk("ui", json!({"type": "text-delta", "delta": "b"})),
        ];
        let chunks: Vec<Value> = bridge_run_stream(
            futures::stream::iter(parts),
            BridgeOptions::new("ui"),
        )
        .collect()
        .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0]["delta"], "a");
        assert_eq!(chunks[1]["delta"], "b");
    }

    #[tokio::test]
    async fn stops_at_the_first_terminal_status() {
        let parts = vec![
            chunk("ui", json!(1)),
            RunStreamPart::Status {
                status: "EXECUTING".to_string(),
            },
            chunk("ui", json!(2)),
            RunStreamPart::Status {
                status: "COMPLETED".to_string(),
            },
            chunk("ui", json!(3)),
        ];
        let chunks: Vec<Value> = bridge_run_stream(
            futures::stream::iter(parts),
            BridgeOptions::new("ui"),
        )
        .collect()
        .await;
        assert_eq!(chunks, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn custom_terminal_statuses_override_the_default() {
        let parts = vec![
            chunk("ui", json!(1)),
            RunStreamPart::Status {
                status: "COMPLETED".to_string(),
            },
            chunk("ui", json!(2)),
            RunStreamPart::Status {
                status: "DRAINED".to_string(),
            },
            chunk("ui", json!(3)),
        ];
        let chunks: Vec<Value> = bridge_run_stream(
            futures::stream::iter(parts),
            BridgeOptions::new("ui").with_terminal_statuses(["DRAINED"]),
        )
        .collect()
        .await;
        assert_eq!(chunks, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn skips_parts_missing_their_chunk() {
        let parts = vec![
            RunStreamPart::Chunk {
                stream_key: "ui".to_string(),
                chunk: None,
            },
            chunk("ui", json!("ok")),
        ];
        let chunks: Vec<Value> = bridge_run_stream(
            futures::stream::iter(parts),
            BridgeOptions::new("ui"),
        )
        .collect()
        .await;
        assert_eq!(chunks, vec![json!("ok")]);
    }

    #[tokio::test]
    async fn releases_the_subscription_when_the_consumer_drops_early() {
        let token = CancellationToken::new();
        let bridge = bridge_run_stream(
            futures::stream::pending::<RunStreamPart>(),
            BridgeOptions::new("ui").with_subscription(token.clone()),
        );
        assert!(!token.is_cancelled());
        drop(bridge);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn releases_the_subscription_after_terminal_cutoff() {
        let token = CancellationToken::new();
        let parts = vec![RunStreamPart::Status {
            status: "FAILED".to_string(),
        }];
        let chunks: Vec<Value> = bridge_run_stream(
            futures::stream::iter(parts),
            BridgeOptions::new("ui").with_subscription(token.clone()),
        )
        .collect()
        .await;
        assert!(chunks.is_empty());
        assert!(token.is_cancelled());
    }

    #[test]
    fn chunk_summaries_stay_compact() {
        let long: String = "x".repeat(500);
        assert_eq!(chunk_summary(&json!(long)).len(), 120);

        let summary = chunk_summary(&json!({
            "type": "text-delta",
            "event": "chunk",
            "data": {"big": "payload"},
            "noise": true,
        }));
        assert!(summary.contains("text-delta"));
        assert!(summary.contains("has_data"));
        assert!(!summary.contains("payload"));
    }
}
