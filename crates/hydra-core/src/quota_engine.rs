//! Quota & approval engine (C6): auto-approval rule, one-pending-per-type
//! enforcement, and the periodic grant-expiry sweep.

use std::sync::Arc;

use chrono::Utc;
use hydra_orchestrator::{OrchestratorBackend, WorkloadSpec};
use hydra_store::models::{
    ApprovalRequest, ApprovalStatus, RequestType, RequestedResources,
};
use hydra_store::{ApprovalRepository, ContainerRepository, QuotaRepository};
use tracing::info;
use uuid::Uuid;

use crate::activity::{ActivityInput, ActivityLog};
use crate::catalog::{ResourceCatalog, ResourceSelection};
use crate::error::QuotaError;
use crate::locks::UserLockMap;

/// Outcome of submitting a resource or node-access request.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    AutoApproved(ApprovalRequest),
    Pending(ApprovalRequest),
}

/// Business logic for the approval workflow and expiry sweep.
pub struct QuotaEngine {
    catalog: Arc<ResourceCatalog>,
    quotas: QuotaRepository,
    containers: ContainerRepository,
    approvals: ApprovalRepository,
    activity: ActivityLog,
    backend: Arc<dyn OrchestratorBackend>,
    locks: Arc<UserLockMap>,
}

impl QuotaEngine {
    #[must_use]
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        quotas: QuotaRepository,
        containers: ContainerRepository,
        approvals: ApprovalRepository,
        activity: ActivityLog,
        backend: Arc<dyn OrchestratorBackend>,
        locks: Arc<UserLockMap>,
    ) -> Self {
        Self { catalog, quotas, containers, approvals, activity, backend, locks }
    }

    /// Submit a resource request, either for a named preset or an explicit
    /// resource bundle. Auto-approves iff the target is the control-plane
    /// node, every requested resource is within the auto-approval
    /// thresholds, `gpu_count` is zero, and (for a preset selection) the
    /// preset is marked auto-approvable; otherwise files a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::AlreadyPending`] if a pending request of the
    /// same type already exists for this user, or [`QuotaError::UnknownPreset`]
    /// if a preset selection names an unknown tier.
    pub async fn submit_resource_request(
        &self,
        username: &str,
        selection: &ResourceSelection,
        target_node: &str,
    ) -> Result<SubmitOutcome, QuotaError> {
        let _guard = self.locks.lock(username).await;

        if self.approvals.find_pending(username, RequestType::Resources).await?.is_some() {
            return Err(QuotaError::AlreadyPending {
                username: username.to_owned(),
                request_type: RequestType::Resources.as_str().to_owned(),
            });
        }

        let (resources, preset_gate) = self
            .catalog
            .resolve_selection(selection)
            .ok_or_else(|| QuotaError::UnknownPreset { tier: selection.tier_label().to_owned() })?;
        let control_plane = self.catalog.control_plane_node();

        let auto_approve = target_node == control_plane
            && preset_gate
            && self
                .catalog
                .within_auto_approval_thresholds(resources.memory_gb, resources.cpus, resources.storage_gb, resources.gpu_count);

        let status = if auto_approve { ApprovalStatus::AutoApproved } else { ApprovalStatus::Pending };
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            target_node: target_node.to_owned(),
            request_type: RequestType::Resources,
            resources: RequestedResources {
                memory_gb: resources.memory_gb,
                cpus: resources.cpus,
                storage_gb: resources.storage_gb,
                gpu_count: resources.gpu_count,
            },
            status,
            reason: None,
            reviewer: None,
            created_at: now,
            decided_at: if auto_approve { Some(now) } else { None },
            expires_at: None,
        };
        self.approvals.insert(&request).await?;

        info!(username, target_node, status = status.as_str(), "resource request submitted");
        Ok(if auto_approve { SubmitOutcome::AutoApproved(request) } else { SubmitOutcome::Pending(request) })
    }

    /// Approve or deny a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::NotPending`] if the request is not currently pending.
    pub async fn decide(&self, id: &str, approve: bool, reviewer: &str, reason: Option<String>) -> Result<ApprovalRequest, QuotaError> {
        let mut request = self.approvals.get(id).await?;
        if request.status != ApprovalStatus::Pending {
            return Err(QuotaError::NotPending { id: id.to_owned() });
        }
        request.status = if approve { ApprovalStatus::Approved } else { ApprovalStatus::Denied };
        request.reviewer = Some(reviewer.to_owned());
        request.reason = reason;
        request.decided_at = Some(Utc::now());
        self.approvals.decide(&request).await?;

        if approve && request.request_type == RequestType::NodeAccess {
            self.quotas.revoke_node_approval(&request.username, &request.target_node).await.ok();
        }
        Ok(request)
    }

    /// Scan every container whose `resources_expire_at` has passed: reset it
    /// to the default preset on the control-plane node, restart the
    /// workload, and record an account-category activity entry. Returns the
    /// number of containers reset.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError`] if the underlying sweep query fails.
    pub async fn sweep_expired_grants(&self) -> Result<u64, QuotaError> {
        let expired = self.containers.list_expired(Utc::now()).await?;
        let mut reset_count = 0u64;

        for mut config in expired {
            let _guard = self.locks.lock(&config.username).await;
            let default_preset = self
                .catalog
                .default_preset()
                .ok_or_else(|| QuotaError::UnknownPreset { tier: self.catalog.default_preset_tier.clone() })?;
            let control_plane = self.catalog.control_plane_node().to_owned();

            config.preset_tier = default_preset.tier.clone();
            config.memory_gb = default_preset.memory_gb;
            config.cpus = default_preset.cpus;
            config.storage_gb = default_preset.storage_gb;
            config.gpu_count = default_preset.gpu_count;
            config.current_node = control_plane.clone();
            config.resources_expire_at = None;
            config.updated_at = Utc::now();

            if let Err(e) = self.backend.delete_workload(&config.username).await {
                tracing::warn!(username = %config.username, error = %e, "failed to delete workload before grant-expiry reset");
                continue;
            }
            let restart = self
                .backend
                .create_workload(&WorkloadSpec {
                    username: config.username.clone(),
                    image: "hydra/student-workspace:latest".to_owned(),
                    memory_gb: config.memory_gb,
                    cpus: config.cpus,
                    gpu_count: config.gpu_count,
                    node: control_plane,
                    env: std::collections::HashMap::new(),
                    volume_name: format!("{}-home", config.username),
                })
                .await;
            if let Err(e) = restart {
                tracing::warn!(username = %config.username, error = %e, "failed to restart workload after grant-expiry reset");
                continue;
            }

            self.containers.upsert(&config).await?;
            self.activity
                .record(&config.username, ActivityInput {
                    category: hydra_store::models::ActivityCategory::Account,
                    action: "resources_expired_reset".to_owned(),
                    target: Some(config.preset_tier.clone()),
                    success: true,
                    duration_ms: None,
                    details: None,
                })
                .await
                .ok();

            reset_count += 1;
        }

        Ok(reset_count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hydra_orchestrator::HostBackend;
    use hydra_store::models::{ActivityCategory, NodeApprovals, Role, UserQuota};
    use hydra_store::{ActivityLogRepository, pool::connect};

    async fn engine(dir: &std::path::Path) -> QuotaEngine {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let quotas = QuotaRepository::new(pool.clone());
        let now = Utc::now();
        quotas
            .upsert(&UserQuota {
                username: "omar".to_owned(),
                email: "omar@example.edu".to_owned(),
                role: Role::Student,
                max_memory_gb: 16.0,
                max_cpus: 8.0,
                max_storage_gb: 100.0,
                node_approvals: NodeApprovals::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed quota");

        QuotaEngine::new(
            Arc::new(ResourceCatalog::default_for_cluster()),
            quotas,
            ContainerRepository::new(pool.clone()),
            ApprovalRepository::new(pool.clone()),
            ActivityLog::new(ActivityLogRepository::new(pool)),
            Arc::new(HostBackend::new(dir.join("routes")).await.expect("backend")),
            Arc::new(UserLockMap::new()),
        )
    }

    fn preset(tier: &str) -> ResourceSelection {
        ResourceSelection::Preset { tier: tier.to_owned() }
    }

    fn explicit(memory_gb: f64, cpus: f64, storage_gb: f64, gpu_count: u32) -> ResourceSelection {
        ResourceSelection::Explicit { memory_gb, cpus, storage_gb, gpu_count }
    }

    #[tokio::test]
    async fn conservative_preset_on_control_plane_auto_approves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path()).await;
        let outcome = e.submit_resource_request("omar", &preset("conservative"), "control-plane").await.expect("submit");
        assert!(matches!(outcome, SubmitOutcome::AutoApproved(_)));
    }

    #[tokio::test]
    async fn gpu_preset_never_auto_approves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path()).await;
        let outcome = e.submit_resource_request("omar", &preset("gpu-training"), "gpu_node_a").await.expect("submit");
        assert!(matches!(outcome, SubmitOutcome::Pending(_)));
    }

    #[tokio::test]
    async fn second_pending_request_of_same_type_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path()).await;
        e.submit_resource_request("omar", &preset("gpu-training"), "gpu_node_a").await.expect("first submit");

        let err = e.submit_resource_request("omar", &preset("gpu-training"), "gpu_node_b").await;
        assert!(matches!(err, Err(QuotaError::AlreadyPending { .. })));
    }

    #[tokio::test]
    async fn approving_a_pending_request_marks_it_decided() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path()).await;
        let outcome = e.submit_resource_request("omar", &preset("gpu-training"), "gpu_node_a").await.expect("submit");
        let SubmitOutcome::Pending(request) = outcome else { panic!("expected pending") };

        let decided = e.decide(&request.id, true, "faculty-jane", None).await.expect("decide");
        assert_eq!(decided.status, ApprovalStatus::Approved);

        let err = e.decide(&request.id, true, "faculty-jane", None).await;
        assert!(matches!(err, Err(QuotaError::NotPending { .. })));
    }

    #[tokio::test]
    async fn explicit_request_within_thresholds_on_control_plane_auto_approves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path()).await;
        let outcome = e.submit_resource_request("omar", &explicit(1.0, 1.0, 10.0, 0), "control-plane").await.expect("submit");
        assert!(matches!(outcome, SubmitOutcome::AutoApproved(_)));
    }

    #[tokio::test]
    async fn explicit_request_matching_standard_preset_numbers_is_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path()).await;
        let outcome = e.submit_resource_request("omar", &explicit(8.0, 4.0, 50.0, 0), "control-plane").await.expect("submit");
        assert!(matches!(outcome, SubmitOutcome::Pending(_)));
    }

    #[test]
    fn activity_category_account_exists() {
        let _ = ActivityCategory::Account;
    }
}
