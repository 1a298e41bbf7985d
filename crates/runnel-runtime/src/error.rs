//! Runtime error taxonomy.

use runnel_contract::StatusSinkError;
use thiserror::Error;

/// Failures surfaced to the caller driving a stream.
///
/// Telemetry failures never appear here: the telemetry path is best-effort
/// and contained behind the accumulator/tap boundary.
#[derive(Debug, Error)]
pub enum StreamRunError {
    /// The generation call itself failed; carries the provider's message.
    #[error("{0}")]
    Provider(String),

    /// The stream was cancelled externally.
    #[error("stream run aborted")]
    Aborted,

    /// A status checkpoint write failed.
    #[error(transparent)]
    Status(#[from] StatusSinkError),
}

impl StreamRunError {
    /// Message used when a provider failure carries no error of its own.
    pub(crate) fn provider_fallback() -> Self {
        Self::Provider("stream run failed".to_string())
    }
}
