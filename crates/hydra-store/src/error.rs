//! Storage error types.
//!
//! Each variant carries enough context to diagnose the problem without a
//! debugger, and maps cleanly onto the four error kinds the control plane
//! surfaces to HTTP clients (see `hydra-server::error`).

/// Errors from the persistence store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to open or migrate the database at the given path.
    #[error("failed to open store at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A query against the store failed.
    #[error("query failed: {reason}")]
    Query { reason: String },

    /// The requested row was not found.
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    /// The write would violate a uniqueness or cardinality invariant.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// A value failed to (de)serialize to/from its stored JSON representation.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Query {
            reason: err.to_string(),
        }
    }
}
