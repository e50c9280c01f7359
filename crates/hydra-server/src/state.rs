//! Shared application state handed to every route handler.

use std::sync::Arc;

use hydra_core::{ActivityLog, ContainerService, EventBus, MigrationEngine, QuotaEngine, ResourceCatalog, SecurityMonitor};
use hydra_orchestrator::OrchestratorBackend;
use hydra_store::{ApprovalRepository, QuotaRepository, ShareRepository};

/// Everything a handler needs, cloned cheaply (every field is an `Arc` or a
/// pool-backed repository that is itself cheap to clone).
#[derive(Clone)]
pub struct AppState {
    pub containers: Arc<ContainerService>,
    pub quotas: Arc<QuotaEngine>,
    pub migrations: Arc<MigrationEngine>,
    pub security: Arc<SecurityMonitor>,
    pub shares: ShareRepository,
    pub catalog: Arc<ResourceCatalog>,
    pub backend: Arc<dyn OrchestratorBackend>,
    /// Read-only access for listing approvals/quotas directly; the engine
    /// itself only exposes the submit/decide/sweep operations.
    pub approvals: ApprovalRepository,
    pub quota_records: QuotaRepository,
    /// A log reader independent of `containers`' internal one, used by the
    /// `/logs` routes that read activity directly rather than through a
    /// container-lifecycle operation.
    pub activity: Arc<ActivityLog>,
    pub events: EventBus,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
