//! Checkpoint patch construction and persistence.
//!
//! One [`StatusHandlers`] instance serves one stream: it knows the stream id,
//! the active run id and label, and how to phrase the status field, and turns
//! lifecycle transitions into upserted patches on the sink.

use runnel_contract::{StatusPatch, StatusSink, StatusSinkError, StepBatch};
use serde_json::Value;
use std::sync::Arc;

/// Status labels written into checkpoint patches.
#[derive(Debug, Clone)]
pub struct StatusLabels {
    pub running: String,
    pub completed: String,
    pub errored: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            running: "running".to_string(),
            completed: "completed".to_string(),
            errored: "error".to_string(),
        }
    }
}

/// Builds and persists status patches for one stream.
pub struct StatusHandlers {
    sink: Arc<dyn StatusSink>,
    stream_id: String,
    run_id: Option<String>,
    stream_label: Option<String>,
    labels: StatusLabels,
}

impl StatusHandlers {
    pub fn new(sink: Arc<dyn StatusSink>, stream_id: impl Into<String>) -> Self {
        Self {
            sink,
            stream_id: stream_id.into(),
            run_id: None,
            stream_label: None,
            labels: StatusLabels::default(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_stream_label(mut self, stream_label: impl Into<String>) -> Self {
        self.stream_label = Some(stream_label.into());
        self
    }

    pub fn with_labels(mut self, labels: StatusLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Running checkpoint: status label, active run id and stream label.
    pub async fn on_start(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        let patch = merged(self.running_patch(None), extra);
        self.sink.checkpoint(&self.stream_id, patch).await
    }

    /// Mid-stream running checkpoint carrying a serialized step batch.
    pub async fn on_step_finish(
        &self,
        batch: &StepBatch,
        extra: Option<StatusPatch>,
    ) -> Result<(), StatusSinkError> {
        let patch = merged(self.running_patch(Some(batch)), extra);
        self.sink.checkpoint(&self.stream_id, patch).await
    }

    /// Completed checkpoint: actives cleared, last completed run recorded.
    pub async fn on_finish(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        let mut patch = StatusPatch::new();
        patch.insert("status".into(), Value::from(self.labels.completed.clone()));
        patch.insert("active_run_id".into(), Value::Null);
        patch.insert("active_stream_label".into(), Value::Null);
        patch.insert(
            "last_completed_run_id".into(),
            option_value(self.run_id.clone()),
        );
        self.sink
            .checkpoint(&self.stream_id, merged(patch, extra))
            .await
    }

    /// Errored checkpoint: actives cleared.
    pub async fn on_error(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        self.sink
            .checkpoint(&self.stream_id, merged(self.errored_patch(), extra))
            .await
    }

    /// Abort books the same errored shape; the distinction lives in the
    /// lifecycle state, not the persisted record.
    pub async fn on_abort(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        self.sink
            .checkpoint(&self.stream_id, merged(self.errored_patch(), extra))
            .await
    }

    fn running_patch(&self, batch: Option<&StepBatch>) -> StatusPatch {
        let mut patch = StatusPatch::new();
        patch.insert("status".into(), Value::from(self.labels.running.clone()));
        patch.insert("active_run_id".into(), option_value(self.run_id.clone()));
        patch.insert(
            "active_stream_label".into(),
            option_value(self.stream_label.clone()),
        );
        if let Some(batch) = batch {
            if !batch.is_empty() {
                patch.insert("messages".into(), Value::from(batch.messages.clone()));
                patch.insert("parts".into(), Value::from(batch.parts.clone()));
            }
        }
        patch
    }

    fn errored_patch(&self) -> StatusPatch {
        let mut patch = StatusPatch::new();
        patch.insert("status".into(), Value::from(self.labels.errored.clone()));
        patch.insert("active_run_id".into(), Value::Null);
        patch.insert("active_stream_label".into(), Value::Null);
        patch
    }
}

fn option_value(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Caller-supplied fields win over the base patch.
fn merged(mut base: StatusPatch, extra: Option<StatusPatch>) -> StatusPatch {
    if let Some(extra) = extra {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }
    base
}
