use super::*;

/// Lifecycle of a single generation stream.
///
/// `Idle` is initial; `Running` is entered once via `start`. The remaining
/// three states are terminal: once any of them is reached, no further
/// side-effecting transition occurs. A new stream requires a new lifecycle
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Running,
    Completed,
    Errored,
    Aborted,
}

impl LifecycleState {
    /// True for `Completed`, `Errored`, and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Aborted)
    }

    /// True for the failure terminals (`Errored`, `Aborted`).
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Errored | Self::Aborted)
    }
}

/// Open key → value map merged into the persisted stream record at
/// checkpoint time. Constructed by the runtime, committed by the
/// [`StatusSink`](crate::StatusSink).
pub type StatusPatch = serde_json::Map<String, Value>;

/// Serialized output of one provider step.
///
/// Message and part payloads are opaque to the runtime beyond "may be
/// empty"; their wire shape belongs to the host application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepBatch {
    pub messages: Vec<Value>,
    pub parts: Vec<Value>,
}

impl StepBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.parts.is_empty()
    }
}

/// Errors surfaced by a status sink.
#[derive(Debug, Error)]
pub enum StatusSinkError {
    /// Stream record not found.
    #[error("stream not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend rejected the write.
    #[error("checkpoint rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_state_terminality() {
        assert!(!LifecycleState::Idle.is_terminal());
        assert!(!LifecycleState::Running.is_terminal());
        assert!(LifecycleState::Completed.is_terminal());
        assert!(LifecycleState::Errored.is_terminal());
        assert!(LifecycleState::Aborted.is_terminal());
        assert!(!LifecycleState::Completed.is_failure());
        assert!(LifecycleState::Errored.is_failure());
        assert!(LifecycleState::Aborted.is_failure());
    }

    #[test]
    fn lifecycle_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(LifecycleState::Running).unwrap(),
            serde_json::json!("running")
        );
        assert_eq!(
            serde_json::to_value(LifecycleState::Aborted).unwrap(),
            serde_json::json!("aborted")
        );
    }

    #[test]
    fn step_batch_emptiness() {
        assert!(StepBatch::default().is_empty());
        let batch = StepBatch {
            messages: vec![serde_json::json!({"role": "assistant"})],
            parts: vec![],
        };
        assert!(!batch.is_empty());
    }
}
