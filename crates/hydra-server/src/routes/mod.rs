//! HTTP route handlers for the Hydra control plane.
//!
//! Routes are organized by subsystem:
//! - `containers`: container lifecycle (init/status/start/stop/destroy/wipe/routes)
//! - `approvals`: quota requests and their approval workflow
//! - `migrations`: cross-node container migration
//! - `shares`: share link issuance and resolution
//! - `auth`: the proxy's forward-auth callback
//! - `servers`: node health fan-out
//! - `logs`: activity log reads and SSE streams

pub mod approvals;
pub mod auth;
pub mod containers;
pub mod logs;
pub mod migrations;
pub mod servers;
pub mod shares;
