//! Server configuration, assembled once at startup from the process
//! environment. See each field's doc comment for the env var it reads.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Which [`hydra_orchestrator::OrchestratorBackend`] implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorKind {
    Host,
    Cluster,
}

/// Every externally configurable knob the control plane reads at startup.
///
/// Recognized environment variables:
/// - `HYDRA_BIND_ADDR` — HTTP listen address (default `0.0.0.0:8900`)
/// - `HYDRA_DATABASE_URL` — SQLite connection string (default `sqlite://hydra.db`)
/// - `HYDRA_ORCHESTRATOR` — `host` or `cluster` (default `host`)
/// - `HYDRA_CONTROL_PLANE_ADDR`, `HYDRA_GPU_NODE_A_ADDR`, `HYDRA_GPU_NODE_B_ADDR` —
///   node addresses passed through to the cluster backend and the SSH multiplexer
/// - `HYDRA_PRESETS_CATALOG` — optional path to a catalog override (unset uses the
///   built-in three-preset/three-node topology)
/// - `HYDRA_AUTO_APPROVE_MAX_MEMORY_GB`, `HYDRA_AUTO_APPROVE_MAX_CPUS`,
///   `HYDRA_AUTO_APPROVE_MAX_STORAGE_GB` — override the catalog's default
///   auto-approval thresholds
/// - `HYDRA_APPROVAL_NOTIFY_EMAILS` — comma-separated addresses notified of new
///   pending approvals
/// - `HYDRA_SSH_MUX_CONFIG_ROOT`, `HYDRA_PROXY_DYNAMIC_ROOT` — directories the SSH
///   multiplexer and reverse proxy watch for per-user config
/// - `HYDRA_PUBLIC_BASE_URL` — base URL used to build editor/notebook links
/// - `HYDRA_MINING_ENFORCEMENT_ENABLED` — `true`/`false` (default `true`)
/// - `HYDRA_STATS_INTERVAL_MS` — periodic security scan interval, `0` disables it
/// - `HYDRA_LOGS_CAP_BYTES_PER_USER` — per-user activity log live cap in bytes
/// - `HYDRA_MIGRATION_TIMEOUT_MS` — reserved for a future per-migration deadline override
/// - `HYDRA_LOG_LEVEL` — `tracing_subscriber::EnvFilter` directive (default `info`)
/// - `HYDRA_QUOTA_SWEEP_INTERVAL_SECS` — grant-expiry sweep interval (default 3600)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub orchestrator: OrchestratorKind,
    pub control_plane_addr: String,
    pub gpu_node_a_addr: Option<String>,
    pub gpu_node_b_addr: Option<String>,
    pub presets_catalog: Option<String>,
    pub auto_approve_max_memory_gb: Option<f64>,
    pub auto_approve_max_cpus: Option<f64>,
    pub auto_approve_max_storage_gb: Option<f64>,
    pub approval_notify_emails: Vec<String>,
    pub ssh_mux_config_root: PathBuf,
    pub proxy_dynamic_root: PathBuf,
    pub public_base_url: String,
    pub mining_enforcement_enabled: bool,
    pub stats_interval_ms: u64,
    pub logs_cap_bytes_per_user: i64,
    pub migration_timeout_ms: u64,
    pub log_level: String,
    pub quota_sweep_interval_secs: u64,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl ServerConfig {
    /// Build a config by reading the recognized environment variables,
    /// falling back to development-friendly defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let orchestrator = match env_string("HYDRA_ORCHESTRATOR", "host").as_str() {
            "cluster" => OrchestratorKind::Cluster,
            _ => OrchestratorKind::Host,
        };

        Self {
            bind_addr: env_string("HYDRA_BIND_ADDR", "0.0.0.0:8900")
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8900))),
            database_url: env_string("HYDRA_DATABASE_URL", "sqlite://hydra.db"),
            orchestrator,
            control_plane_addr: env_string("HYDRA_CONTROL_PLANE_ADDR", "control-plane"),
            gpu_node_a_addr: std::env::var("HYDRA_GPU_NODE_A_ADDR").ok(),
            gpu_node_b_addr: std::env::var("HYDRA_GPU_NODE_B_ADDR").ok(),
            presets_catalog: std::env::var("HYDRA_PRESETS_CATALOG").ok(),
            auto_approve_max_memory_gb: std::env::var("HYDRA_AUTO_APPROVE_MAX_MEMORY_GB")
                .ok()
                .and_then(|v| v.parse().ok()),
            auto_approve_max_cpus: std::env::var("HYDRA_AUTO_APPROVE_MAX_CPUS")
                .ok()
                .and_then(|v| v.parse().ok()),
            auto_approve_max_storage_gb: std::env::var("HYDRA_AUTO_APPROVE_MAX_STORAGE_GB")
                .ok()
                .and_then(|v| v.parse().ok()),
            approval_notify_emails: std::env::var("HYDRA_APPROVAL_NOTIFY_EMAILS")
                .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default(),
            ssh_mux_config_root: PathBuf::from(env_string("HYDRA_SSH_MUX_CONFIG_ROOT", "./data/ssh-mux")),
            proxy_dynamic_root: PathBuf::from(env_string("HYDRA_PROXY_DYNAMIC_ROOT", "./data/proxy")),
            public_base_url: env_string("HYDRA_PUBLIC_BASE_URL", "https://hydra.example.edu"),
            mining_enforcement_enabled: env_parsed("HYDRA_MINING_ENFORCEMENT_ENABLED", true),
            stats_interval_ms: env_parsed("HYDRA_STATS_INTERVAL_MS", 300_000),
            logs_cap_bytes_per_user: env_parsed("HYDRA_LOGS_CAP_BYTES_PER_USER", 100 * 1024 * 1024),
            migration_timeout_ms: env_parsed("HYDRA_MIGRATION_TIMEOUT_MS", 300_000),
            log_level: env_string("HYDRA_LOG_LEVEL", "info"),
            quota_sweep_interval_secs: env_parsed("HYDRA_QUOTA_SWEEP_INTERVAL_SECS", 3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_to_a_usable_bind_addr() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8900".parse().unwrap(),
            database_url: "sqlite://hydra.db".to_owned(),
            orchestrator: OrchestratorKind::Host,
            control_plane_addr: "control-plane".to_owned(),
            gpu_node_a_addr: None,
            gpu_node_b_addr: None,
            presets_catalog: None,
            auto_approve_max_memory_gb: None,
            auto_approve_max_cpus: None,
            auto_approve_max_storage_gb: None,
            approval_notify_emails: Vec::new(),
            ssh_mux_config_root: PathBuf::from("./data/ssh-mux"),
            proxy_dynamic_root: PathBuf::from("./data/proxy"),
            public_base_url: "https://hydra.example.edu".to_owned(),
            mining_enforcement_enabled: true,
            stats_interval_ms: 300_000,
            logs_cap_bytes_per_user: 100 * 1024 * 1024,
            migration_timeout_ms: 300_000,
            log_level: "info".to_owned(),
            quota_sweep_interval_secs: 3600,
        };
        assert_eq!(config.orchestrator, OrchestratorKind::Host);
    }

    #[test]
    #[allow(unsafe_code)]
    fn notify_emails_split_and_trim() {
        unsafe {
            std::env::set_var("HYDRA_APPROVAL_NOTIFY_EMAILS", " a@example.edu, b@example.edu ,");
        }
        let config = ServerConfig::from_env();
        assert_eq!(config.approval_notify_emails, vec!["a@example.edu", "b@example.edu"]);
        unsafe {
            std::env::remove_var("HYDRA_APPROVAL_NOTIFY_EMAILS");
        }
    }
}
