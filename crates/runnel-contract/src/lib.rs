//! Contracts shared across the runnel stream runtime.
//!
//! One generation stream is driven by exactly one lifecycle instance; the
//! types here describe what flows across its boundaries: the lifecycle state
//! itself, the status patches persisted at checkpoints, the discriminated
//! parts observed on the token stream, and the traits the runtime consumes
//! (persistence sink, step-result serializer).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;

mod parts;
mod traits;
mod types;

pub use parts::{FinishEvent, StreamPart};
pub use traits::{MemoryStatusSink, StatusSink, StepSerializer};
pub use types::{LifecycleState, StatusPatch, StatusSinkError, StepBatch};
