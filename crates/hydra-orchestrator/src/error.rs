//! Orchestrator backend error types.

/// Errors from an orchestrator backend operation.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The backend rejected the request outright (bad spec, quota violation
    /// surfaced by the backend itself). Not retried.
    #[error("rejected by backend: {reason}")]
    Rejected { reason: String },

    /// The named object does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// A transient failure (5xx, timeout, connection reset). Safe to retry
    /// with backoff up to the operation's deadline.
    #[error("transient backend failure: {reason}")]
    Transient { reason: String },

    /// The operation's deadline elapsed before the backend reported completion.
    #[error("operation '{operation}' timed out after {elapsed_secs}s")]
    DeadlineExceeded { operation: String, elapsed_secs: u64 },

    /// The backend returned a response hydra-orchestrator could not interpret.
    #[error("backend protocol error: {reason}")]
    Protocol { reason: String },
}

impl OrchestratorError {
    /// Whether retrying this call with backoff might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
