//! Container service (C4): business rules on top of the orchestrator
//! backend — init/get_status/start/stop/destroy/wipe, default routes, key
//! material, and user-registered route add/remove.
//!
//! Cross-node migration is handled by [`crate::migration`]; this module
//! only drives the steady-state lifecycle of a single container on its
//! current node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hydra_orchestrator::{OrchestratorBackend, ServiceEndpointSpec, VolumeSpec, WorkloadSpec};
use hydra_store::{ActivityLogRepository, ContainerRepository, QuotaRepository};
use tracing::info;
use uuid::Uuid;

use crate::activity::{self, ActivityLog};
use crate::catalog::{ResourceCatalog, ResourceSelection};
use crate::error::ContainerError;
use crate::events::EventBus;
use crate::keys::KeyPair;
use crate::locks::UserLockMap;
use crate::proxy_config::{HostProxyWriter, RouteDocument};
use crate::ssh_mux::SshMuxWriter;

/// Response to a successful `init`.
#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub workload_name: String,
    pub editor_url: String,
    pub notebook_url: String,
    /// The one-time credential, present only the first time this workload
    /// is created.
    pub credential: Option<String>,
}

/// Pure-read status for a user's container.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub exists: bool,
    pub running: bool,
    pub ready: bool,
    pub node: String,
    pub restart_count: u32,
    pub started_at: Option<chrono::DateTime<Utc>>,
}

/// Business logic for provisioning and operating student containers.
pub struct ContainerService {
    catalog: Arc<ResourceCatalog>,
    containers: ContainerRepository,
    quotas: QuotaRepository,
    activity: ActivityLog,
    backend: Arc<dyn OrchestratorBackend>,
    locks: Arc<UserLockMap>,
    ssh_mux: Arc<SshMuxWriter>,
    proxy: Arc<HostProxyWriter>,
    public_base_url: String,
}

impl ContainerService {
    #[must_use]
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        containers: ContainerRepository,
        quotas: QuotaRepository,
        activity_repo: ActivityLogRepository,
        backend: Arc<dyn OrchestratorBackend>,
        locks: Arc<UserLockMap>,
        ssh_mux: Arc<SshMuxWriter>,
        proxy: Arc<HostProxyWriter>,
        public_base_url: String,
        events: EventBus,
    ) -> Self {
        Self {
            catalog,
            containers,
            quotas,
            activity: ActivityLog::new(activity_repo).with_bus(events),
            backend,
            locks,
            ssh_mux,
            proxy,
            public_base_url,
        }
    }

    fn workload_name(username: &str) -> String {
        format!("hydra-student-{username}")
    }

    fn service_name(username: &str) -> String {
        format!("{username}-svc")
    }

    fn urls(&self, username: &str) -> (String, String) {
        (
            format!("{}/students/{username}/vscode/", self.public_base_url),
            format!("{}/students/{username}/jupyter/", self.public_base_url),
        )
    }

    /// Create a container for `username` if absent, or return its existing
    /// identity. Only the first creation returns a credential. `selection`
    /// may name a catalog preset or an explicit resource bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::QuotaExceeded`] if the requested resources
    /// exceed the user's effective caps, or any backend/store/writer failure.
    pub async fn init(
        &self,
        username: &str,
        selection: &ResourceSelection,
        target_node: &str,
    ) -> Result<InitOutcome, ContainerError> {
        let _guard = self.locks.lock(username).await;
        let (editor_url, notebook_url) = self.urls(username);
        let workload_name = Self::workload_name(username);

        if let Some(existing) = self.containers.find(username).await? {
            let status = self.backend.get_workload_status(username).await?;
            if status.exists {
                return Ok(InitOutcome { workload_name, editor_url, notebook_url, credential: None });
            }
            let resources = crate::catalog::ResolvedResources {
                memory_gb: existing.memory_gb,
                cpus: existing.cpus,
                storage_gb: existing.storage_gb,
                gpu_count: existing.gpu_count,
            };
            return self.provision(username, resources, &existing.current_node, &workload_name).await;
        }

        let quota = self.quotas.get(username).await?;
        let (resources, _) = self
            .catalog
            .resolve_selection(selection)
            .ok_or_else(|| ContainerError::QuotaExceeded { reason: format!("unknown preset '{}'", selection.tier_label()) })?;

        if resources.memory_gb > quota.max_memory_gb || resources.cpus > quota.max_cpus || resources.storage_gb > quota.max_storage_gb {
            return Err(ContainerError::QuotaExceeded {
                reason: format!("requested resources exceed the effective caps for '{username}'"),
            });
        }

        let outcome = self.provision(username, resources, target_node, &workload_name).await?;

        let config = hydra_store::models::ContainerConfig {
            username: username.to_owned(),
            current_node: target_node.to_owned(),
            preset_tier: selection.tier_label().to_owned(),
            memory_gb: resources.memory_gb,
            cpus: resources.cpus,
            storage_gb: resources.storage_gb,
            gpu_count: resources.gpu_count,
            resources_expire_at: None,
            last_migration_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.containers.upsert(&config).await?;

        self.activity
            .record(username, activity::ActivityInput {
                category: hydra_store::models::ActivityCategory::Container,
                action: "container_initialized".to_owned(),
                target: Some(workload_name.clone()),
                success: true,
                duration_ms: None,
                details: None,
            })
            .await?;

        info!(username, node = target_node, "container initialized");
        Ok(outcome)
    }

    async fn provision(
        &self,
        username: &str,
        resources: crate::catalog::ResolvedResources,
        target_node: &str,
        workload_name: &str,
    ) -> Result<InitOutcome, ContainerError> {
        let node = self
            .catalog
            .node(target_node)
            .ok_or_else(|| ContainerError::QuotaExceeded { reason: format!("unknown node '{target_node}'") })?;

        let keys = KeyPair::generate();
        let credential = Uuid::new_v4().to_string();
        let volume_name = format!("{username}-home");

        self.backend
            .create_volume(&VolumeSpec {
                name: volume_name.clone(),
                size_gb: resources.storage_gb,
                storage_class: node.storage_class,
                annotations: HashMap::from([("hydra.owner".to_owned(), username.to_owned())]),
            })
            .await?;

        let mut env = HashMap::new();
        env.insert("HYDRA_PUBLIC_KEY".to_owned(), keys.authorized_keys_line(&format!("{username}@hydra")));

        self.backend
            .create_workload(&WorkloadSpec {
                username: username.to_owned(),
                image: "hydra/student-workspace:latest".to_owned(),
                memory_gb: resources.memory_gb,
                cpus: resources.cpus,
                gpu_count: resources.gpu_count,
                node: target_node.to_owned(),
                env,
                volume_name: volume_name.clone(),
            })
            .await?;

        self.backend.put_credential_secret(workload_name, credential.as_bytes()).await?;

        self.backend
            .create_service_endpoint(&ServiceEndpointSpec {
                name: Self::service_name(username),
                workload_name: workload_name.to_owned(),
                port: crate::catalog::P_EDITOR,
            })
            .await?;

        self.ssh_mux.init_user(username, target_node, crate::ssh_mux::derive_forwarded_port(username), &keys).await?;

        let doc = RouteDocument::defaults(username, &Self::service_name(username), &format!("{}/auth/verify", self.public_base_url));
        self.proxy.write(&doc).await?;

        let (editor_url, notebook_url) = self.urls(username);
        Ok(InitOutcome {
            workload_name: workload_name.to_owned(),
            editor_url,
            notebook_url,
            credential: Some(credential),
        })
    }

    /// Pure read of a user's container status.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] on backend failure.
    pub async fn get_status(&self, username: &str) -> Result<ContainerStatus, ContainerError> {
        let status = self.backend.get_workload_status(username).await?;
        Ok(ContainerStatus {
            exists: status.exists,
            running: status.running,
            ready: status.ready,
            node: status.node,
            restart_count: status.restart_count,
            started_at: status.started_at,
        })
    }

    /// Recreate the workload from stored config if stopped; preserves the
    /// volume. If a not-ready workload is present, it is deleted and
    /// recreated.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if no container config exists,
    /// or any backend/store failure.
    pub async fn start(&self, username: &str) -> Result<(), ContainerError> {
        let _guard = self.locks.lock(username).await;
        let config = self
            .containers
            .find(username)
            .await?
            .ok_or_else(|| ContainerError::NotFound { username: username.to_owned() })?;

        let status = self.backend.get_workload_status(username).await?;
        if status.exists && !status.ready {
            self.backend.delete_workload(username).await?;
        }

        let node = self
            .catalog
            .node(&config.current_node)
            .ok_or_else(|| ContainerError::QuotaExceeded { reason: format!("unknown node '{}'", config.current_node) })?;
        let _ = node;

        self.backend
            .create_workload(&WorkloadSpec {
                username: username.to_owned(),
                image: "hydra/student-workspace:latest".to_owned(),
                memory_gb: config.memory_gb,
                cpus: config.cpus,
                gpu_count: config.gpu_count,
                node: config.current_node.clone(),
                env: HashMap::new(),
                volume_name: format!("{username}-home"),
            })
            .await?;

        self.backend.wait_workload_ready(username, Duration::from_secs(30)).await?;
        Ok(())
    }

    /// Delete the workload, preserving its volume.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] on backend failure.
    pub async fn stop(&self, username: &str) -> Result<(), ContainerError> {
        let _guard = self.locks.lock(username).await;
        self.backend.delete_workload(username).await?;
        Ok(())
    }

    /// Delete the workload, its service and route; the volume is retained.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] on backend failure.
    pub async fn destroy(&self, username: &str) -> Result<(), ContainerError> {
        let _guard = self.locks.lock(username).await;
        self.destroy_locked(username).await
    }

    async fn destroy_locked(&self, username: &str) -> Result<(), ContainerError> {
        self.backend.delete_workload(username).await?;
        self.backend.delete_service_endpoint(&Self::service_name(username)).await?;
        self.proxy.remove(username).await?;
        Ok(())
    }

    /// `destroy` plus volume and secret deletion; waits for the workload to
    /// be gone first.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] on backend failure.
    pub async fn wipe(&self, username: &str) -> Result<(), ContainerError> {
        let _guard = self.locks.lock(username).await;
        self.destroy_locked(username).await?;

        for _ in 0..10 {
            let status = self.backend.get_workload_status(username).await?;
            if !status.exists {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        self.backend.delete_volume(&format!("{username}-home")).await?;
        self.backend.delete_credential_secret(&Self::workload_name(username)).await?;
        self.ssh_mux.remove_user(username).await?;
        self.containers.delete(username).await?;
        Ok(())
    }

    /// Register a user-defined route. Reserved endpoint names and ports are refused.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ReservedEndpoint`] / [`ContainerError::ReservedPort`]
    /// for reserved names/ports, or [`ContainerError::NotFound`] if no container exists.
    pub async fn add_route(&self, username: &str, endpoint: &str, port: u16) -> Result<(), ContainerError> {
        if crate::catalog::RESERVED_ENDPOINTS.contains(&endpoint) {
            return Err(ContainerError::ReservedEndpoint { name: endpoint.to_owned() });
        }
        if crate::catalog::RESERVED_PORTS.contains(&port) {
            return Err(ContainerError::ReservedPort { port });
        }

        let _guard = self.locks.lock(username).await;
        self.containers
            .find(username)
            .await?
            .ok_or_else(|| ContainerError::NotFound { username: username.to_owned() })?;

        let mut doc = self.proxy.read(username).await?;
        doc.add_route(endpoint, port);
        self.proxy.write(&doc).await?;
        Ok(())
    }

    /// Remove a previously registered route. A no-op if it was never registered.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] on a writer failure.
    pub async fn remove_route(&self, username: &str, endpoint: &str) -> Result<(), ContainerError> {
        let _guard = self.locks.lock(username).await;
        let mut doc = self.proxy.read(username).await?;
        doc.remove_route(endpoint);
        self.proxy.write(&doc).await?;
        Ok(())
    }

    /// Overwrite the user's key pair. The caller must restart the workload
    /// for the new public key to take effect inside it.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] on a writer failure.
    pub async fn regenerate_keys(&self, username: &str) -> Result<String, ContainerError> {
        let _guard = self.locks.lock(username).await;
        let keys = KeyPair::generate();
        self.ssh_mux.write_keys(username, &keys).await?;
        Ok(keys.authorized_keys_line(&format!("{username}@hydra")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hydra_orchestrator::HostBackend;
    use hydra_store::models::{NodeApprovals, Role, UserQuota};
    use hydra_store::pool::connect;

    async fn service(dir: &std::path::Path) -> ContainerService {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let quotas = QuotaRepository::new(pool.clone());
        quotas
            .upsert(&UserQuota {
                username: "alice".to_owned(),
                email: "alice@example.edu".to_owned(),
                role: Role::Student,
                max_memory_gb: 16.0,
                max_cpus: 8.0,
                max_storage_gb: 100.0,
                node_approvals: NodeApprovals::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .expect("seed quota");

        ContainerService::new(
            Arc::new(ResourceCatalog::default_for_cluster()),
            ContainerRepository::new(pool.clone()),
            quotas,
            ActivityLogRepository::new(pool),
            Arc::new(HostBackend::new(dir.join("routes")).await.expect("backend")),
            Arc::new(UserLockMap::new()),
            Arc::new(SshMuxWriter::new(dir.join("ssh-mux"))),
            Arc::new(HostProxyWriter::new(dir.join("proxy"))),
            "https://hydra.example.edu".to_owned(),
            crate::events::EventBus::new(),
        )
    }

    fn preset(tier: &str) -> ResourceSelection {
        ResourceSelection::Preset { tier: tier.to_owned() }
    }

    #[tokio::test]
    async fn init_is_idempotent_and_only_returns_credential_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path()).await;

        let first = svc.init("alice", &preset("conservative"), "control-plane").await.expect("init");
        assert!(first.credential.is_some());

        let second = svc.init("alice", &preset("conservative"), "control-plane").await.expect("init again");
        assert!(second.credential.is_none());
        assert_eq!(first.workload_name, second.workload_name);
    }

    #[tokio::test]
    async fn init_rejects_presets_over_quota() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path()).await;
        let err = svc.init("alice", &preset("gpu-training"), "gpu_node_a").await;
        assert!(matches!(err, Err(ContainerError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn init_accepts_an_explicit_resource_bundle_not_matching_any_preset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path()).await;
        let selection = ResourceSelection::Explicit { memory_gb: 1.0, cpus: 1.0, storage_gb: 10.0, gpu_count: 0 };
        let outcome = svc.init("alice", &selection, "control-plane").await.expect("init");
        assert!(outcome.credential.is_some());
    }

    #[tokio::test]
    async fn add_route_rejects_reserved_endpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path()).await;
        svc.init("alice", &preset("conservative"), "control-plane").await.expect("init");

        let err = svc.add_route("alice", "vscode", 9000).await;
        assert!(matches!(err, Err(ContainerError::ReservedEndpoint { .. })));
    }

    #[tokio::test]
    async fn add_then_remove_route_restores_default_routes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path()).await;
        svc.init("alice", &preset("conservative"), "control-plane").await.expect("init");

        svc.add_route("alice", "tensorboard", 6006).await.expect("add");
        svc.remove_route("alice", "tensorboard").await.expect("remove");

        let doc = svc.proxy.read("alice").await.expect("read");
        assert_eq!(doc.routes.len(), 2);
    }

    #[tokio::test]
    async fn destroy_then_destroy_again_both_succeed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path()).await;
        svc.init("alice", &preset("conservative"), "control-plane").await.expect("init");

        svc.destroy("alice").await.expect("first destroy");
        svc.destroy("alice").await.expect("second destroy is idempotent");
    }
}
