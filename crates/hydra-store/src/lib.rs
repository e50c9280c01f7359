//! Embedded relational persistence for the control plane.
//!
//! A single SQLite database file backs every tenant-facing record: quotas,
//! container configs, approval requests, share links, migration records,
//! the activity log, and security events. Each entity gets its own
//! repository struct wrapping a shared [`sqlx::SqlitePool`] — there is no
//! unit-of-work abstraction above that, since every write here is already a
//! single statement or a short, explicitly ordered sequence of them.

pub mod activity_log;
pub mod approvals;
pub mod containers;
pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod quotas;
pub mod security_events;
pub mod shares;

pub use activity_log::ActivityLogRepository;
pub use approvals::ApprovalRepository;
pub use containers::ContainerRepository;
pub use error::StoreError;
pub use migrations::MigrationRepository;
pub use pool::connect;
pub use quotas::QuotaRepository;
pub use security_events::SecurityEventRepository;
pub use shares::ShareRepository;
