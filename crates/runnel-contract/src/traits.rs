use super::*;

/// Persistence sink for stream status checkpoints.
///
/// Implementations upsert `patch` into the record identified by `stream_id`;
/// repeated checkpoints for the same stream overwrite field-wise. The runtime
/// awaits completion before it considers a terminal transition finished, so a
/// process exit cannot race an in-flight terminal write. Retry/backoff, if
/// any, belongs to the implementation.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn checkpoint(&self, stream_id: &str, patch: StatusPatch) -> Result<(), StatusSinkError>;
}

/// Converts an opaque provider step result into a serialized message/part
/// batch for persistence. Opaque to the runtime beyond "may be empty".
pub trait StepSerializer<R>: Send + Sync {
    fn serialize(&self, step: &R) -> StepBatch;
}

impl<R, F> StepSerializer<R> for F
where
    F: Fn(&R) -> StepBatch + Send + Sync,
{
    fn serialize(&self, step: &R) -> StepBatch {
        self(step)
    }
}

/// In-memory sink recording every checkpoint, for tests and inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusSink {
    inner: Arc<Mutex<Vec<(String, StatusPatch)>>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded `(stream_id, patch)` pairs, in write order.
    pub fn checkpoints(&self) -> Vec<(String, StatusPatch)> {
        self.inner.lock().unwrap().clone()
    }

    /// The most recent patch, if any checkpoint was written.
    pub fn last(&self) -> Option<(String, StatusPatch)> {
        self.inner.lock().unwrap().last().cloned()
    }

    /// Number of checkpoints written so far.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn checkpoint(&self, stream_id: &str, patch: StatusPatch) -> Result<(), StatusSinkError> {
        self.inner
            .lock()
            .unwrap()
            .push((stream_id.to_string(), patch));
        Ok(())
    }
}
