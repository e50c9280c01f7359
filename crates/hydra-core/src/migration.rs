//! Migration engine (C5): moves a user's container to a different node,
//! stepping a persisted record through the 0..10 / -1 state machine and
//! publishing progress on the event bus as it goes.
//!
//! Same-storage-class moves collapse the data-copy steps to a logical
//! rebind of the existing volume; a cross-class move provisions a new
//! volume on the target and drives a bounded copy job before the source
//! side is ever touched. The SSH multiplexer's per-user `upstream` file is
//! rewritten to the new node at the routing step so the multiplexer picks
//! up the move on its next poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hydra_orchestrator::{CopyJobSpec, JobOutcome, OrchestratorBackend, VolumeSpec, WorkloadSpec};
use hydra_store::models::{MigrationRecord, MigrationStatus, MigrationStep};
use hydra_store::{ContainerRepository, MigrationRepository, QuotaRepository};
use tracing::info;
use uuid::Uuid;

use crate::catalog::ResourceCatalog;
use crate::error::MigrationError;
use crate::events::{ControlPlaneEvent, EventBus};
use crate::locks::UserLockMap;
use crate::ssh_mux::{derive_forwarded_port, SshMuxWriter};

const COPY_JOB_DEADLINE: Duration = Duration::from_secs(5 * 60);
const WORKLOAD_READY_DEADLINE: Duration = Duration::from_secs(60);

/// Business logic driving cross-node container migrations.
pub struct MigrationEngine {
    catalog: Arc<ResourceCatalog>,
    containers: ContainerRepository,
    quotas: QuotaRepository,
    migrations: MigrationRepository,
    backend: Arc<dyn OrchestratorBackend>,
    locks: Arc<UserLockMap>,
    events: EventBus,
    ssh_mux: Arc<SshMuxWriter>,
}

impl MigrationEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        containers: ContainerRepository,
        quotas: QuotaRepository,
        migrations: MigrationRepository,
        backend: Arc<dyn OrchestratorBackend>,
        locks: Arc<UserLockMap>,
        events: EventBus,
        ssh_mux: Arc<SshMuxWriter>,
    ) -> Self {
        Self { catalog, containers, quotas, migrations, backend, locks, events, ssh_mux }
    }

    /// Start a migration to `target_node`. Supersedes (marks failed) any
    /// migration already in progress for this user.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NoContainer`] if the user has no container,
    /// [`MigrationError::NodeNotApproved`] if `target_node` is GPU-enabled
    /// and the user lacks a non-expired approval for it, or a step failure
    /// partway through the move.
    pub async fn migrate(&self, username: &str, target_node: &str) -> Result<String, MigrationError> {
        let _guard = self.locks.lock(username).await;

        let config = self
            .containers
            .find(username)
            .await?
            .ok_or_else(|| MigrationError::NoContainer { username: username.to_owned() })?;

        let node = self.catalog.node(target_node).ok_or_else(|| MigrationError::StepFailed {
            step: "initiated".to_owned(),
            reason: format!("unknown node '{target_node}'"),
        })?;

        if node.gpu_enabled {
            let quota = self.quotas.get(username).await?;
            if !quota.is_node_approved(target_node, Utc::now()) {
                return Err(MigrationError::NodeNotApproved {
                    username: username.to_owned(),
                    node: target_node.to_owned(),
                });
            }
        }

        if let Some(mut prior) = self.migrations.find_in_progress(username).await? {
            prior.status = MigrationStatus::Failed;
            prior.current_step = -1;
            prior.error_message = Some("superseded by a newer migration request".to_owned());
            prior.completed_at = Some(Utc::now());
            self.migrations.advance(&prior).await?;
        }

        let mut record = MigrationRecord {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            from_node: config.current_node.clone(),
            to_node: target_node.to_owned(),
            current_step: 0,
            status: MigrationStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            step_log: vec![step_entry(0, "migration initiated")],
        };
        self.migrations.insert(&record).await?;

        match self.run(&mut record, &config.preset_tier, config.memory_gb, config.cpus, config.storage_gb, config.gpu_count).await {
            Ok(()) => Ok(record.id),
            Err(e) => {
                record.status = MigrationStatus::Failed;
                record.current_step = -1;
                record.error_message = Some(e.to_string());
                record.completed_at = Some(Utc::now());
                let _ = self.migrations.advance(&record).await;
                self.events.publish(ControlPlaneEvent::MigrationFailed {
                    username: username.to_owned(),
                    migration_id: record.id.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        record: &mut MigrationRecord,
        preset_tier: &str,
        memory_gb: f64,
        cpus: f64,
        storage_gb: f64,
        gpu_count: u32,
    ) -> Result<(), MigrationError> {
        let username = record.username.clone();
        let workload_name = username.clone();
        let source_node = self.catalog.node(&record.from_node).ok_or_else(|| MigrationError::StepFailed {
            step: "initiated".to_owned(),
            reason: format!("unknown node '{}'", record.from_node),
        })?;
        let target_node = self.catalog.node(&record.to_node).ok_or_else(|| MigrationError::StepFailed {
            step: "initiated".to_owned(),
            reason: format!("unknown node '{}'", record.to_node),
        })?;
        let same_storage_class = source_node.storage_class == target_node.storage_class;

        self.advance(record, 1, "stopping workload").await?;
        self.backend.delete_workload(&workload_name).await.map_err(step_failure(1))?;

        self.advance(record, 2, "workload stopped").await?;

        let source_volume = format!("{username}-home");
        let target_volume = if same_storage_class {
            source_volume.clone()
        } else {
            let target_volume = format!("{username}-home-{}", record.to_node);

            self.advance(record, 3, "creating target storage").await?;
            self.backend
                .create_volume(&VolumeSpec {
                    name: target_volume.clone(),
                    size_gb: storage_gb,
                    storage_class: target_node.storage_class,
                    annotations: HashMap::from([("hydra.owner".to_owned(), username.clone())]),
                })
                .await
                .map_err(step_failure(3))?;

            self.advance(record, 4, "target storage ready").await?;
            self.advance(record, 5, "copying data").await?;

            let outcome = self
                .backend
                .run_copy_job(
                    &CopyJobSpec {
                        name: format!("{username}-migrate-copy"),
                        source_volume: source_volume.clone(),
                        target_volume: target_volume.clone(),
                        target_node: record.to_node.clone(),
                    },
                    COPY_JOB_DEADLINE,
                )
                .await
                .map_err(step_failure(5))?;

            if outcome == JobOutcome::Failed {
                return Err(MigrationError::StepFailed {
                    step: "copying_data".to_owned(),
                    reason: "copy job reported failure".to_owned(),
                });
            }

            self.advance(record, 6, "data copied").await?;
            target_volume
        };

        self.advance(record, 7, "creating workload on target node").await?;
        let preset = self.catalog.preset(preset_tier).ok_or_else(|| MigrationError::StepFailed {
            step: "creating_pod".to_owned(),
            reason: format!("unknown preset '{preset_tier}'"),
        })?;
        self.backend
            .create_workload(&WorkloadSpec {
                username: username.clone(),
                image: "hydra/student-workspace:latest".to_owned(),
                memory_gb,
                cpus,
                gpu_count,
                node: record.to_node.clone(),
                env: HashMap::new(),
                volume_name: target_volume.clone(),
            })
            .await
            .map_err(step_failure(7))?;
        let _ = preset;

        self.advance(record, 8, "waiting for workload readiness").await?;
        self.backend
            .wait_workload_ready(&workload_name, WORKLOAD_READY_DEADLINE)
            .await
            .map_err(step_failure(8))?;

        self.advance(record, 9, "updating routes").await?;
        let config = hydra_store::models::ContainerConfig {
            username: username.clone(),
            current_node: record.to_node.clone(),
            preset_tier: preset_tier.to_owned(),
            memory_gb,
            cpus,
            storage_gb,
            gpu_count,
            resources_expire_at: None,
            last_migration_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.containers.upsert(&config).await?;

        self.ssh_mux
            .write_upstream(&username, &record.to_node, derive_forwarded_port(&username))
            .await
            .map_err(|e| MigrationError::StepFailed { step: "updating_routes".to_owned(), reason: e.to_string() })?;

        record.status = MigrationStatus::Completed;
        record.completed_at = Some(Utc::now());
        self.advance(record, 10, "migration completed").await?;

        if !same_storage_class {
            self.backend.delete_volume(&source_volume).await.ok();
        }

        info!(username, from = %config.current_node, "migration completed");
        Ok(())
    }

    async fn advance(&self, record: &mut MigrationRecord, step: i32, message: &str) -> Result<(), MigrationError> {
        record.current_step = step;
        record.step_log.push(step_entry(step, message));
        self.migrations.advance(record).await?;
        self.events.publish(ControlPlaneEvent::MigrationStep {
            username: record.username.clone(),
            migration_id: record.id.clone(),
            step,
            message: message.to_owned(),
        });
        Ok(())
    }

    /// Fetch a migration record by id.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if no such record exists.
    pub async fn get(&self, id: &str) -> Result<MigrationRecord, MigrationError> {
        Ok(self.migrations.get(id).await?)
    }

    /// List all migration records for a user, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if the query fails.
    pub async fn list_for_user(&self, username: &str) -> Result<Vec<MigrationRecord>, MigrationError> {
        Ok(self.migrations.list_for_user(username).await?)
    }
}

fn step_entry(step: i32, message: &str) -> MigrationStep {
    MigrationStep { step, timestamp: Utc::now(), message: message.to_owned() }
}

fn step_failure(step: i32) -> impl Fn(hydra_orchestrator::OrchestratorError) -> MigrationError {
    move |e| MigrationError::StepFailed { step: step.to_string(), reason: e.to_string() }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hydra_orchestrator::HostBackend;
    use hydra_store::models::{NodeApprovals, Role, UserQuota};
    use hydra_store::pool::connect;

    async fn engine(dir: &std::path::Path, approvals: NodeApprovals) -> MigrationEngine {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let quotas = QuotaRepository::new(pool.clone());
        let containers = ContainerRepository::new(pool.clone());
        let now = Utc::now();

        quotas
            .upsert(&UserQuota {
                username: "nina".to_owned(),
                email: "nina@example.edu".to_owned(),
                role: Role::Student,
                max_memory_gb: 64.0,
                max_cpus: 16.0,
                max_storage_gb: 500.0,
                node_approvals: approvals,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed quota");

        containers
            .upsert(&hydra_store::models::ContainerConfig {
                username: "nina".to_owned(),
                current_node: "control-plane".to_owned(),
                preset_tier: "conservative".to_owned(),
                memory_gb: 2.0,
                cpus: 1.0,
                storage_gb: 10.0,
                gpu_count: 0,
                resources_expire_at: None,
                last_migration_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed container");

        let backend = Arc::new(HostBackend::new(dir.join("routes")).await.expect("backend"));
        backend
            .create_volume(&hydra_orchestrator::VolumeSpec {
                name: "nina-home".to_owned(),
                size_gb: 10.0,
                storage_class: hydra_orchestrator::StorageClass::Hot,
                annotations: HashMap::new(),
            })
            .await
            .expect("seed volume");
        backend
            .create_workload(&WorkloadSpec {
                username: "nina".to_owned(),
                image: "hydra/student-workspace:latest".to_owned(),
                memory_gb: 2.0,
                cpus: 1.0,
                gpu_count: 0,
                node: "control-plane".to_owned(),
                env: HashMap::new(),
                volume_name: "nina-home".to_owned(),
            })
            .await
            .expect("seed workload");

        MigrationEngine::new(
            Arc::new(ResourceCatalog::default_for_cluster()),
            containers,
            quotas,
            MigrationRepository::new(pool),
            backend,
            Arc::new(UserLockMap::new()),
            EventBus::new(),
            Arc::new(SshMuxWriter::new(dir.join("ssh-mux"))),
        )
    }

    #[tokio::test]
    async fn migration_to_gpu_node_without_approval_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = engine(dir.path(), NodeApprovals::new()).await;
        let err = e.migrate("nina", "gpu_node_a").await;
        assert!(matches!(err, Err(MigrationError::NodeNotApproved { .. })));
    }

    #[tokio::test]
    async fn migration_to_gpu_node_with_approval_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut approvals = NodeApprovals::new();
        approvals.insert("gpu_node_a".to_owned(), None);
        let e = engine(dir.path(), approvals).await;

        let id = e.migrate("nina", "gpu_node_a").await.expect("migrate");
        let record = e.get(&id).await.expect("get");
        assert_eq!(record.status, MigrationStatus::Completed);
        assert_eq!(record.current_step, 10);

        let config = e.containers.find("nina").await.expect("find").expect("present");
        assert_eq!(config.current_node, "gpu_node_a");

        let upstream = tokio::fs::read_to_string(dir.path().join("ssh-mux").join("nina").join("upstream"))
            .await
            .expect("read upstream");
        assert!(upstream.starts_with("gpu_node_a:"));
    }

    #[tokio::test]
    async fn migration_to_same_storage_class_node_skips_copy_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut approvals = NodeApprovals::new();
        approvals.insert("gpu_node_b".to_owned(), None);
        let e = engine(dir.path(), approvals).await;

        let id = e.migrate("nina", "gpu_node_b").await.expect("migrate");
        let record = e.get(&id).await.expect("get");
        assert_eq!(record.status, MigrationStatus::Completed);
        assert_eq!(record.current_step, 10);

        let steps: Vec<i32> = record.step_log.iter().map(|s| s.step).collect();
        assert!(!steps.iter().any(|s| (3..=6).contains(s)), "unexpected copy step in {steps:?}");
        assert!(steps.contains(&7) && steps.contains(&10));
    }

    #[tokio::test]
    async fn second_migration_supersedes_first_as_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut approvals = NodeApprovals::new();
        approvals.insert("gpu_node_a".to_owned(), None);
        approvals.insert("gpu_node_b".to_owned(), None);
        let e = engine(dir.path(), approvals).await;

        let first_id = e.migrate("nina", "gpu_node_a").await.expect("first migrate");
        e.migrate("nina", "gpu_node_b").await.expect("second migrate");

        let first = e.get(&first_id).await.expect("get first");
        assert_eq!(first.status, MigrationStatus::Failed);
        assert_eq!(first.current_step, -1);
    }
}
