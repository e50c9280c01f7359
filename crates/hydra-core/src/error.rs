//! Composed business-logic errors.
//!
//! Each subsystem gets its own thiserror enum; `hydra-server::error::AppError`
//! maps every variant here (and the ones in `hydra-store`/`hydra-orchestrator`)
//! onto the four error kinds of the specification and an HTTP status.

/// The semantic kind an error belongs to, independent of which subsystem
/// raised it — used by `hydra-server` to pick an HTTP status and by the CLI
/// to decide whether a retry is worth attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller's request itself was invalid (bad field, unknown id).
    Input,
    /// The request was well-formed but a precondition was not met (quota
    /// exceeded, duplicate pending request, invariant violation).
    Precondition,
    /// A downstream dependency failed in a way that may succeed on retry.
    Transient,
    /// An unexpected internal failure.
    Operation,
}

/// Errors raised by the container service (C4).
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container already exists for '{username}'")]
    AlreadyExists { username: String },

    #[error("no container exists for '{username}'")]
    NotFound { username: String },

    #[error("requested resources exceed the effective cap: {reason}")]
    QuotaExceeded { reason: String },

    #[error("endpoint '{name}' is reserved and cannot be registered")]
    ReservedEndpoint { name: String },

    #[error("port {port} is reserved and cannot be registered")]
    ReservedPort { port: u16 },

    #[error("orchestrator backend failure: {0}")]
    Backend(#[from] hydra_orchestrator::OrchestratorError),

    #[error("persistence failure: {0}")]
    Store(#[from] hydra_store::StoreError),

    #[error("ssh multiplexer config failure: {0}")]
    SshMux(#[from] crate::ssh_mux::SshMuxError),

    #[error("proxy config failure: {0}")]
    Proxy(#[from] crate::proxy_config::ProxyConfigError),

    #[error("key generation failed: {reason}")]
    KeyGeneration { reason: String },
}

impl ContainerError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } | Self::NotFound { .. } => ErrorKind::Input,
            Self::QuotaExceeded { .. } | Self::ReservedEndpoint { .. } | Self::ReservedPort { .. } => {
                ErrorKind::Precondition
            }
            Self::Backend(e) if e.is_retryable() => ErrorKind::Transient,
            Self::Backend(_) | Self::KeyGeneration { .. } => ErrorKind::Operation,
            Self::Store(_) | Self::SshMux(_) | Self::Proxy(_) => ErrorKind::Operation,
        }
    }
}

/// Errors raised by the migration engine (C5).
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("no container exists for '{username}'")]
    NoContainer { username: String },

    #[error("node access to '{node}' is not approved for '{username}'")]
    NodeNotApproved { username: String, node: String },

    #[error("migration step failed at '{step}': {reason}")]
    StepFailed { step: String, reason: String },

    #[error("migration superseded by a newer request")]
    Superseded,

    #[error("orchestrator backend failure: {0}")]
    Backend(#[from] hydra_orchestrator::OrchestratorError),

    #[error("persistence failure: {0}")]
    Store(#[from] hydra_store::StoreError),
}

impl MigrationError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoContainer { .. } => ErrorKind::Input,
            Self::NodeNotApproved { .. } | Self::Superseded => ErrorKind::Precondition,
            Self::StepFailed { .. } => ErrorKind::Operation,
            Self::Backend(e) if e.is_retryable() => ErrorKind::Transient,
            Self::Backend(_) | Self::Store(_) => ErrorKind::Operation,
        }
    }
}

/// Errors raised by the quota & approval engine (C6).
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("no quota exists for '{username}'")]
    NoQuota { username: String },

    #[error("unknown preset '{tier}'")]
    UnknownPreset { tier: String },

    #[error("a pending {request_type} request already exists for '{username}'")]
    AlreadyPending { username: String, request_type: String },

    #[error("request '{id}' is not pending")]
    NotPending { id: String },

    #[error("request '{id}' not found")]
    RequestNotFound { id: String },

    #[error("persistence failure: {0}")]
    Store(#[from] hydra_store::StoreError),
}

impl QuotaError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoQuota { .. } | Self::UnknownPreset { .. } | Self::RequestNotFound { .. } => ErrorKind::Input,
            Self::AlreadyPending { .. } | Self::NotPending { .. } => ErrorKind::Precondition,
            Self::Store(_) => ErrorKind::Operation,
        }
    }
}
