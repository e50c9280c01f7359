//! Security monitor (C9): consumes the workload lifecycle event stream,
//! runs a periodic behavioral scan over every provisioned container, and
//! records findings for the dashboard and for enforcement.
//!
//! The event stream and the scan loop are independent: a stream
//! disconnect only affects event-driven detection (oom/die/kill), while
//! the periodic scan (mining, sustained CPU/memory) keeps running on its
//! own schedule regardless.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use hydra_orchestrator::{OrchestratorBackend, WorkloadEvent};
use hydra_store::models::{ActionTaken, SecurityEvent, Severity};
use hydra_store::{ContainerRepository, SecurityEventRepository};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{ResourceCatalog, MINING_PROCESS_BLOCKLIST};
use crate::events::{ControlPlaneEvent, EventBus};

/// How long the monitor waits before reconnecting a dropped event stream.
pub const EVENT_STREAM_BACKOFF: Duration = Duration::from_secs(5);

fn container_display_name(username: &str) -> String {
    format!("hydra-student-{username}")
}

/// Per-container rolling sample history used to compute sustained-load averages.
#[derive(Default)]
struct Window {
    cpu: VecDeque<f64>,
    mem: VecDeque<f64>,
}

impl Window {
    fn push(&mut self, cpu_pct: f64, mem_pct: f64, capacity: usize) {
        self.cpu.push_back(cpu_pct);
        self.mem.push_back(mem_pct);
        while self.cpu.len() > capacity {
            self.cpu.pop_front();
        }
        while self.mem.len() > capacity {
            self.mem.pop_front();
        }
    }

    fn avg_cpu(&self) -> f64 {
        average(&self.cpu)
    }

    fn avg_mem(&self) -> f64 {
        average(&self.mem)
    }
}

fn average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Event-driven and periodic abuse/stability detection over student workloads.
pub struct SecurityMonitor {
    catalog: Arc<ResourceCatalog>,
    containers: ContainerRepository,
    events_repo: SecurityEventRepository,
    backend: Arc<dyn OrchestratorBackend>,
    bus: EventBus,
    enforcement_enabled: bool,
    history: RwLock<HashMap<String, Window>>,
}

impl SecurityMonitor {
    #[must_use]
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        containers: ContainerRepository,
        events_repo: SecurityEventRepository,
        backend: Arc<dyn OrchestratorBackend>,
        bus: EventBus,
        enforcement_enabled: bool,
    ) -> Self {
        Self { catalog, containers, events_repo, backend, bus, enforcement_enabled, history: RwLock::new(HashMap::new()) }
    }

    /// Drive the event-driven side forever: subscribe, consume events until
    /// the stream ends, back off, and reconnect. Never returns under normal
    /// operation; intended to run as a background task.
    pub async fn run_event_loop(&self) {
        loop {
            match self.backend.subscribe_events().await {
                Ok(mut rx) => {
                    while let Some(event) = rx.recv().await {
                        self.handle_event(event).await;
                    }
                    warn!("workload event stream ended, reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "failed to subscribe to workload event stream");
                }
            }
            tokio::time::sleep(EVENT_STREAM_BACKOFF).await;
        }
    }

    async fn handle_event(&self, event: WorkloadEvent) {
        let username = event.workload_name().to_owned();
        match event {
            WorkloadEvent::Oom { .. } => {
                self.record(&username, "container_oom", Severity::Critical, "workload was OOM-killed", serde_json::json!({}), ActionTaken::Logged).await;
            }
            WorkloadEvent::Exited { code, .. } => {
                if code == 0 {
                    return;
                }
                let severity = if code == 137 || code == 143 { Severity::Info } else { Severity::Warning };
                self.record(
                    &username,
                    "process_killed",
                    severity,
                    &format!("workload exited with code {code}"),
                    serde_json::json!({ "exit_code": code }),
                    ActionTaken::Logged,
                )
                .await;
            }
            WorkloadEvent::Killed { signal, .. } => {
                if signal == "SIGKILL" {
                    self.record(
                        &username,
                        "process_killed",
                        Severity::Warning,
                        "workload received SIGKILL",
                        serde_json::json!({ "signal": signal }),
                        ActionTaken::Logged,
                    )
                    .await;
                }
            }
            WorkloadEvent::Started { .. } | WorkloadEvent::Stopped { .. } => {
                self.history.write().await.remove(&username);
                let action = if matches!(event, WorkloadEvent::Started { .. }) { "workload_started" } else { "workload_stopped" };
                self.record(&username, action, Severity::Info, "lifecycle transition", serde_json::json!({}), ActionTaken::Logged).await;
            }
        }
    }

    /// Run one pass of the periodic scan over every provisioned container.
    /// A failure reading one workload's stats does not abort the cycle.
    ///
    /// # Errors
    ///
    /// Returns [`hydra_store::StoreError`] only if listing containers itself fails.
    pub async fn scan_once(&self) -> Result<(), hydra_store::StoreError> {
        let configs = self.containers.list_all().await?;
        let window_size = self.catalog.thresholds.rolling_window_samples;

        for config in configs {
            let username = config.username;
            let stats = match self.backend.workload_stats(&username).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(username, error = %e, "skipping security scan for workload, stats unavailable");
                    continue;
                }
            };

            let matched: Vec<&str> = stats
                .processes
                .iter()
                .filter_map(|p| {
                    let lowered = p.to_lowercase();
                    MINING_PROCESS_BLOCKLIST.iter().find(|m| lowered.contains(*m)).copied()
                })
                .collect();

            if !matched.is_empty() {
                self.handle_mining_detected(&username, &matched).await;
                continue;
            }

            let (avg_cpu, avg_mem) = {
                let mut history = self.history.write().await;
                let window = history.entry(username.clone()).or_default();
                window.push(stats.cpu_pct, stats.mem_pct, window_size);
                (window.avg_cpu(), window.avg_mem())
            };

            let t = self.catalog.thresholds;
            if avg_cpu >= t.critical_cpu_pct {
                self.record(&username, "sustained_high_cpu", Severity::Critical, "average CPU usage critical over rolling window", serde_json::json!({"avg_cpu_pct": avg_cpu}), ActionTaken::Alerted).await;
            } else if avg_cpu >= t.warning_cpu_pct {
                self.record(&username, "high_cpu", Severity::Warning, "average CPU usage elevated over rolling window", serde_json::json!({"avg_cpu_pct": avg_cpu}), ActionTaken::Logged).await;
            }

            if avg_mem >= t.critical_mem_pct {
                self.record(&username, "high_memory", Severity::Critical, "average memory usage critical over rolling window", serde_json::json!({"avg_mem_pct": avg_mem}), ActionTaken::Alerted).await;
            } else if avg_mem >= t.warning_mem_pct {
                self.record(&username, "high_memory", Severity::Warning, "average memory usage elevated over rolling window", serde_json::json!({"avg_mem_pct": avg_mem}), ActionTaken::Logged).await;
            }
        }

        Ok(())
    }

    async fn handle_mining_detected(&self, username: &str, matched: &[&str]) {
        let action = if self.enforcement_enabled {
            match self.backend.pause_workload(username).await {
                Ok(()) => ActionTaken::ContainerPaused,
                Err(e) => {
                    warn!(username, error = %e, "failed to pause workload after mining detection");
                    ActionTaken::PauseFailed
                }
            }
        } else {
            ActionTaken::Alerted
        };

        self.record(
            username,
            "mining_detected",
            Severity::Critical,
            "process table matched the mining-software blocklist",
            serde_json::json!({ "detectedProcesses": matched }),
            action,
        )
        .await;
    }

    async fn record(
        &self,
        username: &str,
        event_type: &str,
        severity: Severity,
        description: &str,
        metrics: serde_json::Value,
        action_taken: ActionTaken,
    ) {
        let event = SecurityEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            username: username.to_owned(),
            container_name: container_display_name(username),
            event_type: event_type.to_owned(),
            severity,
            description: description.to_owned(),
            metrics,
            action_taken,
        };

        if let Err(e) = self.events_repo.record(&event).await {
            warn!(username, error = %e, "failed to persist security event");
        }
        info!(username, event_type, severity = severity.as_str(), "security event recorded");
        self.bus.publish(ControlPlaneEvent::SecurityFinding {
            username: username.to_owned(),
            kind: event_type.to_owned(),
            severity: severity.as_str().to_owned(),
            detail: description.to_owned(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hydra_orchestrator::{HostBackend, WorkloadSpec, WorkloadStats};
    use hydra_store::models::{ContainerConfig, NodeApprovals, Role, UserQuota};
    use hydra_store::pool::connect;
    use hydra_store::QuotaRepository;

    async fn monitor(dir: &std::path::Path, enforcement_enabled: bool) -> (SecurityMonitor, Arc<HostBackend>) {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let quotas = QuotaRepository::new(pool.clone());
        let containers = ContainerRepository::new(pool.clone());
        let now = chrono::Utc::now();

        quotas
            .upsert(&UserQuota {
                username: "frank".to_owned(),
                email: "frank@example.edu".to_owned(),
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

        containers
            .upsert(&ContainerConfig {
                username: "frank".to_owned(),
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
            .create_workload(&WorkloadSpec {
                username: "frank".to_owned(),
                image: "hydra/student-workspace:latest".to_owned(),
                memory_gb: 2.0,
                cpus: 1.0,
                gpu_count: 0,
                node: "control-plane".to_owned(),
                env: HashMap::new(),
                volume_name: "frank-home".to_owned(),
            })
            .await
            .expect("seed workload");

        let monitor = SecurityMonitor::new(
            Arc::new(ResourceCatalog::default_for_cluster()),
            containers,
            SecurityEventRepository::new(pool),
            backend.clone(),
            EventBus::new(),
            enforcement_enabled,
        );
        (monitor, backend)
    }

    #[tokio::test]
    async fn mining_process_triggers_pause_when_enforcement_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, backend) = monitor(dir.path(), true).await;
        backend
            .set_workload_stats("frank", WorkloadStats { cpu_pct: 10.0, mem_pct: 10.0, processes: vec!["xmrig".to_owned()] })
            .await;

        monitor.scan_once().await.expect("scan");

        let events = monitor.events_repo.list_for_user("frank", 10).await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "mining_detected");
        assert_eq!(events[0].action_taken, ActionTaken::ContainerPaused);

        let status = backend.get_workload_status("frank").await.expect("status");
        assert!(status.paused);
    }

    #[tokio::test]
    async fn mining_process_only_alerts_when_enforcement_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, backend) = monitor(dir.path(), false).await;
        backend
            .set_workload_stats("frank", WorkloadStats { cpu_pct: 10.0, mem_pct: 10.0, processes: vec!["minerd".to_owned()] })
            .await;

        monitor.scan_once().await.expect("scan");

        let events = monitor.events_repo.list_for_user("frank", 10).await.expect("list");
        assert_eq!(events[0].action_taken, ActionTaken::Alerted);

        let status = backend.get_workload_status("frank").await.expect("status");
        assert!(!status.paused);
    }

    #[tokio::test]
    async fn sustained_high_cpu_emits_critical_after_window_fills() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, backend) = monitor(dir.path(), false).await;

        for _ in 0..5 {
            backend.set_workload_stats("frank", WorkloadStats { cpu_pct: 99.0, mem_pct: 5.0, processes: vec!["bash".to_owned()] }).await;
            monitor.scan_once().await.expect("scan");
        }

        let events = monitor.events_repo.list_for_user("frank", 10).await.expect("list");
        assert!(events.iter().any(|e| e.event_type == "sustained_high_cpu" && e.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn low_usage_emits_no_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, backend) = monitor(dir.path(), false).await;
        backend.set_workload_stats("frank", WorkloadStats { cpu_pct: 5.0, mem_pct: 5.0, processes: vec!["bash".to_owned()] }).await;

        monitor.scan_once().await.expect("scan");

        let events = monitor.events_repo.list_for_user("frank", 10).await.expect("list");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn oom_event_records_critical_container_oom() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, _backend) = monitor(dir.path(), false).await;
        monitor.handle_event(WorkloadEvent::Oom { workload_name: "frank".to_owned() }).await;

        let events = monitor.events_repo.list_for_user("frank", 10).await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "container_oom");
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn clean_exit_records_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, _backend) = monitor(dir.path(), false).await;
        monitor.handle_event(WorkloadEvent::Exited { workload_name: "frank".to_owned(), code: 0 }).await;

        let events = monitor.events_repo.list_for_user("frank", 10).await.expect("list");
        assert!(events.is_empty());
    }
}
