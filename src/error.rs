// ABOUTME: Defines the error type for the pipeliner library using thiserror.
// ABOUTME: Worker errors are shared behind Arc so the latched error can be handed out repeatedly.

use std::sync::Arc;

/// Errors surfaced by a [`Gate`](crate::gate::Gate).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A job body reported this error through `release`.
    #[error("{0}")]
    Worker(Arc<anyhow::Error>),

    #[error("operation cancelled")]
    Cancelled,

    /// The batch already finished; create a new gate for the next one.
    #[error("gate already drained")]
    Drained,
}

impl GateError {
    /// Wrap a job error.
    pub fn worker(err: impl Into<anyhow::Error>) -> Self {
        GateError::Worker(Arc::new(err.into()))
    }

    /// Returns true if this error came from a cancel signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GateError::Cancelled)
    }

    /// The job error, if this is a worker error.
    pub fn worker_error(&self) -> Option<&anyhow::Error> {
        match self {
            GateError::Worker(err) => Some(err),
            _ => None,
        }
    }
}
