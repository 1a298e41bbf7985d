//! Stream lifecycle state machine.
//!
//! Multiple completion signals (success, drain completion, provider error,
//! external cancellation) race to finalize the same logical run. The guard
//! check and the state write happen under one lock hold with no await point
//! between them, so two near-simultaneous signals cannot both pass; the
//! loser's transition is a no-op and emits nothing.

use crate::error::StreamRunError;
use crate::status::StatusHandlers;
use runnel_contract::{LifecycleState, StatusPatch, StatusSinkError, StepSerializer};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Inputs to [`StreamLifecycle::resolve_stream`].
pub struct ResolveStream<Fut, Pump> {
    /// The generation's own completion signal.
    pub response: Fut,
    /// Background drain that keeps consuming output after `response`
    /// resolves; awaited before any terminal bookkeeping.
    pub stream_pump: Option<Pump>,
    pub on_finish_patch: Option<StatusPatch>,
    pub on_error_patch: Option<StatusPatch>,
}

impl<Fut> ResolveStream<Fut, futures::future::Ready<()>> {
    pub fn new(response: Fut) -> Self {
        Self {
            response,
            stream_pump: None,
            on_finish_patch: None,
            on_error_patch: None,
        }
    }
}

impl<Fut, Pump> ResolveStream<Fut, Pump> {
    pub fn with_pump<P>(self, pump: P) -> ResolveStream<Fut, P> {
        ResolveStream {
            response: self.response,
            stream_pump: Some(pump),
            on_finish_patch: self.on_finish_patch,
            on_error_patch: self.on_error_patch,
        }
    }

    pub fn with_finish_patch(mut self, patch: StatusPatch) -> Self {
        self.on_finish_patch = Some(patch);
        self
    }

    pub fn with_error_patch(mut self, patch: StatusPatch) -> Self {
        self.on_error_patch = Some(patch);
        self
    }
}

/// Lifecycle controller for one stream.
///
/// Exclusively owns the stream's [`LifecycleState`]. Terminal transitions are
/// first-writer-wins across all three terminal states: once any terminal
/// checkpoint is booked, every later terminal operation is a no-op, so at
/// most one terminal checkpoint is ever emitted per stream.
pub struct StreamLifecycle<R> {
    status: StatusHandlers,
    serializer: Arc<dyn StepSerializer<R>>,
    state: Mutex<LifecycleState>,
}

impl<R> StreamLifecycle<R> {
    pub fn new(status: StatusHandlers, serializer: Arc<dyn StepSerializer<R>>) -> Self {
        Self {
            status,
            serializer,
            state: Mutex::new(LifecycleState::Idle),
        }
    }

    /// Cheap synchronous read of the current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    pub fn status(&self) -> &StatusHandlers {
        &self.status
    }

    /// Enter `Running` and emit the initial running checkpoint.
    ///
    /// A terminal stream stays terminal: calling `start` again after the run
    /// finished neither rewinds the state nor writes anything.
    pub async fn start(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return Ok(());
            }
            *state = LifecycleState::Running;
        }
        self.status.on_start(extra).await
    }

    /// Checkpoint mid-stream progress.
    ///
    /// Skipped entirely when the serialized batch is empty and no extra patch
    /// was supplied; empty checkpoints are not worth a write.
    pub async fn handle_step_finish(
        &self,
        step: &R,
        extra: Option<StatusPatch>,
    ) -> Result<(), StatusSinkError> {
        let batch = self.serializer.serialize(step);
        if batch.is_empty() && extra.is_none() {
            return Ok(());
        }
        self.status.on_step_finish(&batch, extra).await
    }

    /// Book a provider failure. No-op once any terminal state is reached.
    pub async fn handle_error(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        if !self.try_enter_terminal(LifecycleState::Errored) {
            return Ok(());
        }
        self.status.on_error(extra).await
    }

    /// Book an external cancellation. No-op once any terminal state is
    /// reached.
    pub async fn handle_abort(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        if !self.try_enter_terminal(LifecycleState::Aborted) {
            return Ok(());
        }
        self.status.on_abort(extra).await
    }

    /// Book successful completion. No-op once any terminal state is reached.
    pub async fn handle_finish(&self, extra: Option<StatusPatch>) -> Result<(), StatusSinkError> {
        if !self.try_enter_terminal(LifecycleState::Completed) {
            return Ok(());
        }
        self.status.on_finish(extra).await
    }

    /// Book the failure, then surface the original error: the primary data
    /// path's failure always reaches the caller even though the lifecycle
    /// also recorded it. Always returns `Err`.
    pub async fn on_stream_error(
        &self,
        error: Option<String>,
        extra: Option<StatusPatch>,
    ) -> Result<(), StreamRunError> {
        self.handle_error(extra).await?;
        Err(error
            .map(StreamRunError::Provider)
            .unwrap_or_else(StreamRunError::provider_fallback))
    }

    /// Book the cancellation, then raise it: an abort is a terminal failure
    /// signal the caller must act on, not a silent success. Always returns
    /// `Err`.
    pub async fn on_stream_abort(
        &self,
        extra: Option<StatusPatch>,
    ) -> Result<(), StreamRunError> {
        self.handle_abort(extra).await?;
        Err(StreamRunError::Aborted)
    }

    /// Orchestrate the two concurrently-progressing completion signals.
    ///
    /// Awaits `response`; then, success or failure alike, awaits the pump so
    /// the terminal checkpoint is only written after the stream has fully
    /// drained. On success the run completes; on failure the error is booked
    /// (unless an explicit abort/error handler already fired) and re-raised.
    pub async fn resolve_stream<T, Fut, Pump>(
        &self,
        args: ResolveStream<Fut, Pump>,
    ) -> Result<T, StreamRunError>
    where
        Fut: Future<Output = Result<T, StreamRunError>>,
        Pump: Future<Output = ()>,
    {
        let outcome = args.response.await;
        if let Some(pump) = args.stream_pump {
            pump.await;
        }
        match outcome {
            Ok(value) => {
                self.handle_finish(args.on_finish_patch).await?;
                Ok(value)
            }
            Err(error) => {
                if !self.state().is_failure() {
                    self.handle_error(args.on_error_patch).await?;
                }
                Err(error)
            }
        }
    }

    /// Guard and transition under one lock hold; returns whether the caller
    /// won the race and owes the checkpoint.
    fn try_enter_terminal(&self, next: LifecycleState) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }
}
