//! Runtime governing one long-running text-generation stream.
//!
//! Tracks the stream's lifecycle (`idle → running →` one terminal outcome),
//! persists status checkpoints at transitions, and wires the reasoning
//! telemetry components around the token stream. Three concurrency hazards
//! are resolved here:
//!
//! - racing completion signals (success, drain completion, provider error,
//!   external cancellation) finalize the run exactly once
//!   ([`StreamLifecycle`]);
//! - reasoning spans are parented against a dynamically changing "current
//!   span" without an explicit call stack ([`StreamTelemetry`]);
//! - the telemetry path is fire-and-forget and can never corrupt or abort
//!   the primary data path (see `runnel-telemetry`).
//!
//! One lifecycle instance drives exactly one stream; a new stream requires a
//! new instance.

pub mod bridge;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod status;

pub use bridge::{bridge_run_stream, default_terminal_statuses, BridgeOptions, RunStreamPart};
pub use driver::{StreamDriver, StreamTelemetry};
pub use error::StreamRunError;
pub use lifecycle::{ResolveStream, StreamLifecycle};
pub use status::{StatusHandlers, StatusLabels};
