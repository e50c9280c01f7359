//! Orchestrator backend abstraction.
//!
//! This crate defines the [`OrchestratorBackend`] trait — a capability set
//! over workloads, volumes, secrets, service endpoints, route rules, a
//! lifecycle event stream, copy jobs, and node health, independent of the
//! technology driving it underneath. The container service in
//! `hydra-core` depends only on this trait; it never knows whether it is
//! talking to a single host's container daemon or a cluster API.
//!
//! Two implementations are provided:
//!
//! - [`HostBackend`] — realizes the contract over a single-host container
//!   daemon, with routes written as declarative files under a watched
//!   directory.
//! - [`ClusterBackend`] — realizes the contract over a cluster API, with
//!   routes, middlewares and workloads as labelled cluster objects.

mod cluster;
mod error;
mod host;
mod retry;
pub mod types;

pub use cluster::{ClusterBackend, ClusterNode};
pub use error::OrchestratorError;
pub use host::HostBackend;
pub use retry::{with_retry, RetryPolicy};
pub use types::{
    CopyJobSpec, JobOutcome, NodeHealth, RouteRuleSpec, ServiceEndpointSpec, StorageClass,
    VolumeSpec, WorkloadEvent, WorkloadSpec, WorkloadStats, WorkloadStatus,
};

/// A pluggable container orchestration backend.
///
/// Every operation is idempotent on repeat with the same logical key
/// (username-derived object name): delete of a missing object is success,
/// create-or-get on a race is success. Implementations must be safe to
/// share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait OrchestratorBackend: Send + Sync + 'static {
    /// Create a workload if absent, or return the existing one unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Rejected`] if the spec is invalid, or
    /// [`OrchestratorError::Transient`] on a retryable backend failure.
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError>;

    /// Fetch a workload's current status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure. A missing workload
    /// is reported via [`WorkloadStatus::absent`], not as an error.
    async fn get_workload_status(&self, name: &str) -> Result<WorkloadStatus, OrchestratorError>;

    /// Delete a workload. Deleting a missing workload is success.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Transient`] on a retryable backend failure.
    async fn delete_workload(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Block until the workload reports ready, or the deadline elapses.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DeadlineExceeded`] if readiness is not
    /// reached in time.
    async fn wait_workload_ready(
        &self,
        name: &str,
        deadline: std::time::Duration,
    ) -> Result<(), OrchestratorError>;

    /// Fetch the most recent log lines for a workload.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn fetch_logs(&self, name: &str, lines: u32) -> Result<Vec<String>, OrchestratorError>;

    /// Create a volume if absent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), OrchestratorError>;

    /// Delete a volume. Deleting a missing volume is success.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn delete_volume(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Store a credential secret for a workload, overwriting any prior value.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn put_credential_secret(&self, workload_name: &str, value: &[u8]) -> Result<(), OrchestratorError>;

    /// Delete a credential secret. Deleting a missing secret is success.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn delete_credential_secret(&self, workload_name: &str) -> Result<(), OrchestratorError>;

    /// Create (or replace) a service endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn create_service_endpoint(&self, spec: &ServiceEndpointSpec) -> Result<(), OrchestratorError>;

    /// Delete a service endpoint. Deleting a missing one is success.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn delete_service_endpoint(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Create (or replace) a route rule, always composed with auth and
    /// prefix-strip middleware by the implementation.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn create_route_rule(&self, spec: &RouteRuleSpec) -> Result<(), OrchestratorError>;

    /// Delete a route rule. Deleting a missing one is success.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on backend failure.
    async fn delete_route_rule(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Subscribe to the lifecycle event stream.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the subscription cannot be established.
    async fn subscribe_events(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<WorkloadEvent>, OrchestratorError>;

    /// Submit a short-lived data-copy job and await completion within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DeadlineExceeded`] if the job does not
    /// complete in time.
    async fn run_copy_job(
        &self,
        spec: &CopyJobSpec,
        deadline: std::time::Duration,
    ) -> Result<JobOutcome, OrchestratorError>;

    /// Fetch a node's health.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if the node is unknown.
    async fn node_health(&self, node: &str) -> Result<NodeHealth, OrchestratorError>;

    /// Sample a running workload's CPU/memory usage and process table.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if the workload does not exist.
    async fn workload_stats(&self, name: &str) -> Result<WorkloadStats, OrchestratorError>;

    /// Pause a running workload in place, without deleting it. Pausing an
    /// already-paused workload is success.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if the workload does not exist,
    /// or [`OrchestratorError::Transient`] on a retryable backend failure.
    async fn pause_workload(&self, name: &str) -> Result<(), OrchestratorError>;
}
