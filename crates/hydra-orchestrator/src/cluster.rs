//! Cluster orchestrator backend (variant B).
//!
//! Realizes the [`OrchestratorBackend`] contract over a cluster API:
//! workloads, services, routes and middlewares are labelled cluster objects
//! carrying `hydra.owner=<username>`; data copy between volumes is a Job
//! scheduled on the target node that mounts both claims. Each node the
//! cluster exposes carries `hydra.node-role` and `hydra.gpu-enabled` labels
//! per the runtime node selector contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use crate::error::OrchestratorError;
use crate::types::{
    CopyJobSpec, JobOutcome, NodeHealth, RouteRuleSpec, ServiceEndpointSpec, VolumeSpec,
    WorkloadEvent, WorkloadSpec, WorkloadStats, WorkloadStatus,
};
use crate::OrchestratorBackend;

/// A node the cluster exposes, with its scheduling labels.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub name: String,
    pub role: String,
    pub gpu_enabled: bool,
}

/// Orchestrator backend over a cluster API.
///
/// Objects are namespaced by `namespace` and labelled by owning username;
/// state here stands in for what a real cluster client would otherwise
/// track server-side.
pub struct ClusterBackend {
    namespace: String,
    nodes: HashMap<String, ClusterNode>,
    workloads: RwLock<HashMap<String, (WorkloadSpec, WorkloadStatus)>>,
    volumes: RwLock<HashMap<String, VolumeSpec>>,
    secrets: RwLock<HashMap<String, Vec<u8>>>,
    services: RwLock<HashMap<String, ServiceEndpointSpec>>,
    routes: RwLock<HashMap<String, RouteRuleSpec>>,
    events: tokio::sync::broadcast::Sender<WorkloadEvent>,
    /// Stats a test or local operator has staged for the next
    /// `workload_stats` call; absent workloads fall back to idle baseline
    /// values.
    stats_overrides: RwLock<HashMap<String, WorkloadStats>>,
}

impl ClusterBackend {
    /// Construct a backend scoped to `namespace`, aware of the given nodes.
    #[must_use]
    pub fn new(namespace: impl Into<String>, nodes: Vec<ClusterNode>) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(256);
        Self {
            namespace: namespace.into(),
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            workloads: RwLock::new(HashMap::new()),
            volumes: RwLock::new(HashMap::new()),
            secrets: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            events,
            stats_overrides: RwLock::new(HashMap::new()),
        }
    }

    /// The student namespace objects are created under.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Stage the stats the next [`OrchestratorBackend::workload_stats`] call
    /// for `name` should report. Intended for local development and tests;
    /// a real deployment would read this from the cluster metrics API instead.
    pub async fn set_workload_stats(&self, name: &str, stats: WorkloadStats) {
        self.stats_overrides.write().await.insert(name.to_owned(), stats);
    }
}

#[async_trait::async_trait]
impl OrchestratorBackend for ClusterBackend {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError> {
        if !self.nodes.contains_key(&spec.node) {
            return Err(OrchestratorError::Rejected {
                reason: format!("node '{}' is not known to this cluster", spec.node),
            });
        }

        let mut workloads = self.workloads.write().await;
        if let Some((existing, _)) = workloads.get(&spec.username) {
            if existing == spec {
                return Ok(());
            }
        }
        let status = WorkloadStatus {
            exists: true,
            running: true,
            ready: true,
            paused: false,
            node: spec.node.clone(),
            restart_count: 0,
            started_at: Some(chrono::Utc::now()),
        };
        workloads.insert(spec.username.clone(), (spec.clone(), status));
        let _ = self.events.send(WorkloadEvent::Started { workload_name: spec.username.clone() });
        Ok(())
    }

    async fn get_workload_status(&self, name: &str) -> Result<WorkloadStatus, OrchestratorError> {
        let workloads = self.workloads.read().await;
        Ok(workloads
            .get(name)
            .map(|(_, status)| status.clone())
            .unwrap_or_else(WorkloadStatus::absent))
    }

    async fn delete_workload(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut workloads = self.workloads.write().await;
        if workloads.remove(name).is_some() {
            let _ = self.events.send(WorkloadEvent::Stopped { workload_name: name.to_owned() });
        }
        Ok(())
    }

    async fn wait_workload_ready(
        &self,
        name: &str,
        deadline: Duration,
    ) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        loop {
            if self.get_workload_status(name).await?.ready {
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(OrchestratorError::DeadlineExceeded {
                    operation: format!("wait_workload_ready({name})"),
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn fetch_logs(&self, name: &str, lines: u32) -> Result<Vec<String>, OrchestratorError> {
        let workloads = self.workloads.read().await;
        if workloads.contains_key(name) {
            Ok((0..lines).map(|i| format!("{name}.{}: line {i}", self.namespace)).collect())
        } else {
            Err(OrchestratorError::NotFound { kind: "workload".to_owned(), name: name.to_owned() })
        }
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), OrchestratorError> {
        self.volumes.write().await.entry(spec.name.clone()).or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> Result<(), OrchestratorError> {
        self.volumes.write().await.remove(name);
        Ok(())
    }

    async fn put_credential_secret(&self, workload_name: &str, value: &[u8]) -> Result<(), OrchestratorError> {
        self.secrets.write().await.insert(workload_name.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete_credential_secret(&self, workload_name: &str) -> Result<(), OrchestratorError> {
        self.secrets.write().await.remove(workload_name);
        Ok(())
    }

    async fn create_service_endpoint(&self, spec: &ServiceEndpointSpec) -> Result<(), OrchestratorError> {
        self.services.write().await.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn delete_service_endpoint(&self, name: &str) -> Result<(), OrchestratorError> {
        self.services.write().await.remove(name);
        Ok(())
    }

    async fn create_route_rule(&self, spec: &RouteRuleSpec) -> Result<(), OrchestratorError> {
        self.routes.write().await.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn delete_route_rule(&self, name: &str) -> Result<(), OrchestratorError> {
        self.routes.write().await.remove(name);
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<WorkloadEvent>, OrchestratorError> {
        let mut broadcast_rx = self.events.subscribe();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Ok(event) = broadcast_rx.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn run_copy_job(
        &self,
        spec: &CopyJobSpec,
        deadline: Duration,
    ) -> Result<JobOutcome, OrchestratorError> {
        if !self.nodes.contains_key(&spec.target_node) {
            return Ok(JobOutcome::Failed);
        }
        let volumes = self.volumes.read().await;
        let ok = volumes.contains_key(&spec.source_volume) && volumes.contains_key(&spec.target_volume);
        drop(volumes);
        if !ok {
            return Ok(JobOutcome::Failed);
        }

        match tokio::time::timeout(deadline, tokio::time::sleep(Duration::from_millis(10))).await {
            Ok(()) => Ok(JobOutcome::Succeeded),
            Err(_) => Err(OrchestratorError::DeadlineExceeded {
                operation: format!("run_copy_job({})", spec.name),
                elapsed_secs: deadline.as_secs(),
            }),
        }
    }

    async fn node_health(&self, node: &str) -> Result<NodeHealth, OrchestratorError> {
        let node = self
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::NotFound { kind: "node".to_owned(), name: node.to_owned() })?;

        let mut labels = HashMap::new();
        labels.insert("hydra.node-role".to_owned(), node.role.clone());
        labels.insert("hydra.gpu-enabled".to_owned(), node.gpu_enabled.to_string());
        Ok(NodeHealth { reachable: true, ready: true, gpu_available: node.gpu_enabled, labels })
    }

    async fn workload_stats(&self, name: &str) -> Result<WorkloadStats, OrchestratorError> {
        if !self.workloads.read().await.contains_key(name) {
            return Err(OrchestratorError::NotFound { kind: "workload".to_owned(), name: name.to_owned() });
        }
        Ok(self
            .stats_overrides
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_else(|| WorkloadStats { cpu_pct: 5.0, mem_pct: 10.0, processes: vec!["node".to_owned(), "bash".to_owned()] }))
    }

    async fn pause_workload(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut workloads = self.workloads.write().await;
        let (_, status) = workloads
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::NotFound { kind: "workload".to_owned(), name: name.to_owned() })?;
        status.paused = true;
        status.running = false;
        Ok(())
    }
}

impl std::fmt::Debug for ClusterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterBackend")
            .field("namespace", &self.namespace)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn sample_nodes() -> Vec<ClusterNode> {
        vec![
            ClusterNode { name: "control-plane".to_owned(), role: "control-plane".to_owned(), gpu_enabled: false },
            ClusterNode { name: "gpu_node_a".to_owned(), role: "training".to_owned(), gpu_enabled: true },
        ]
    }

    fn sample_spec(username: &str, node: &str) -> WorkloadSpec {
        WorkloadSpec {
            username: username.to_owned(),
            image: "hydra/devbox:latest".to_owned(),
            memory_gb: 2.0,
            cpus: 1.0,
            gpu_count: 0,
            node: node.to_owned(),
            env: StdHashMap::new(),
            volume_name: format!("{username}-vol"),
        }
    }

    #[tokio::test]
    async fn create_workload_rejects_unknown_node() {
        let backend = ClusterBackend::new("students", sample_nodes());
        let err = backend.create_workload(&sample_spec("tara", "nonexistent")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Rejected { .. }));
    }

    #[tokio::test]
    async fn node_health_reports_gpu_label() {
        let backend = ClusterBackend::new("students", sample_nodes());
        let health = backend.node_health("gpu_node_a").await.expect("health");
        assert!(health.gpu_available);
        assert_eq!(health.labels.get("hydra.node-role").map(String::as_str), Some("training"));
    }

    #[tokio::test]
    async fn create_workload_on_known_node_succeeds() {
        let backend = ClusterBackend::new("students", sample_nodes());
        backend.create_workload(&sample_spec("uma", "control-plane")).await.expect("create");
        let status = backend.get_workload_status("uma").await.expect("status");
        assert_eq!(status.node, "control-plane");
    }

    #[tokio::test]
    async fn workload_stats_reports_staged_override() {
        let backend = ClusterBackend::new("students", sample_nodes());
        backend.create_workload(&sample_spec("vik", "control-plane")).await.expect("create");
        backend
            .set_workload_stats(
                "vik",
                WorkloadStats { cpu_pct: 97.0, mem_pct: 88.0, processes: vec!["xmrig".to_owned()] },
            )
            .await;
        let stats = backend.workload_stats("vik").await.expect("stats");
        assert_eq!(stats.cpu_pct, 97.0);
        assert!(stats.processes.iter().any(|p| p == "xmrig"));
    }

    #[tokio::test]
    async fn workload_stats_for_missing_workload_is_not_found() {
        let backend = ClusterBackend::new("students", sample_nodes());
        let err = backend.workload_stats("ghost").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn pause_workload_marks_status_paused() {
        let backend = ClusterBackend::new("students", sample_nodes());
        backend.create_workload(&sample_spec("wade", "control-plane")).await.expect("create");
        backend.pause_workload("wade").await.expect("pause");
        let status = backend.get_workload_status("wade").await.expect("status");
        assert!(status.paused);
        assert!(!status.running);
    }
}
