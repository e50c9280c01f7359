//! Business logic for the Hydra control plane.
//!
//! This crate has no knowledge of HTTP, SQL, or any particular container
//! runtime: it depends on `hydra-store` for persistence and
//! `hydra-orchestrator` for workload placement, and exposes the operations
//! `hydra-server` composes into HTTP handlers and background workers.

pub mod activity;
pub mod catalog;
pub mod container_service;
pub mod error;
pub mod events;
pub mod keys;
pub mod locks;
pub mod migration;
pub mod proxy_config;
pub mod quota_engine;
pub mod security_monitor;
pub mod ssh_mux;

pub use activity::{ActivityInput, ActivityLog};
pub use catalog::{ResolvedResources, ResourceCatalog, ResourceSelection};
pub use container_service::{ContainerService, ContainerStatus, InitOutcome};
pub use error::{ContainerError, ErrorKind, MigrationError, QuotaError};
pub use events::{ControlPlaneEvent, EventBus};
pub use locks::UserLockMap;
pub use migration::MigrationEngine;
pub use quota_engine::{QuotaEngine, SubmitOutcome};
pub use security_monitor::SecurityMonitor;
