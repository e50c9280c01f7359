//! Value types shared by every orchestrator backend.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifies a workload's owner and purpose; every backend object carries
/// this so cluster variants can label objects `hydra.owner=<username>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub username: String,
    pub image: String,
    pub memory_gb: f64,
    pub cpus: f64,
    pub gpu_count: u32,
    pub node: String,
    pub env: HashMap<String, String>,
    pub volume_name: String,
}

/// Current state of a workload as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub exists: bool,
    pub running: bool,
    pub ready: bool,
    pub paused: bool,
    pub node: String,
    pub restart_count: u32,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WorkloadStatus {
    /// The status reported for a workload that has never been created.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            exists: false,
            running: false,
            ready: false,
            paused: false,
            node: String::new(),
            restart_count: 0,
            started_at: None,
        }
    }
}

/// Storage class a volume is provisioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageClass {
    Hot,
    Gpu,
    Nfs,
}

impl StorageClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hydra-hot",
            Self::Gpu => "hydra-gpu",
            Self::Nfs => "hydra-nfs",
        }
    }
}

/// A volume backing one user's persistent storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: f64,
    pub storage_class: StorageClass,
    pub annotations: HashMap<String, String>,
}

/// A service endpoint exposing one workload port under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpointSpec {
    pub name: String,
    pub workload_name: String,
    pub port: u16,
}

/// A routed HTTP path, composed with auth and prefix-strip middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRuleSpec {
    pub name: String,
    pub path_prefix: String,
    pub service_name: String,
    pub strip_prefix: bool,
}

/// A lifecycle event on the cluster event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadEvent {
    Started { workload_name: String },
    Stopped { workload_name: String },
    Killed { workload_name: String, signal: String },
    Oom { workload_name: String },
    Exited { workload_name: String, code: i32 },
}

impl WorkloadEvent {
    #[must_use]
    pub fn workload_name(&self) -> &str {
        match self {
            Self::Started { workload_name }
            | Self::Stopped { workload_name }
            | Self::Killed { workload_name, .. }
            | Self::Oom { workload_name }
            | Self::Exited { workload_name, .. } => workload_name,
        }
    }
}

/// A short-lived data-copy job run over two volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyJobSpec {
    pub name: String,
    pub source_volume: String,
    pub target_volume: String,
    pub target_node: String,
}

/// Outcome of a completed (or timed out) copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// Point-in-time resource usage and process table for a running workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStats {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub processes: Vec<String>,
}

/// Health of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub reachable: bool,
    pub ready: bool,
    pub gpu_available: bool,
    pub labels: HashMap<String, String>,
}
