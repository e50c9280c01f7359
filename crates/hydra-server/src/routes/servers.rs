//! Cluster node status: `/servers/status`
//!
//! A minimal fan-out read over the catalog's node list. A full metrics
//! collector is out of scope; this reports only what the orchestrator
//! backend itself can answer.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/status", get(status))
}

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub role: String,
    pub gpu_enabled: bool,
    pub reachable: bool,
    pub ready: bool,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Vec<NodeStatus>> {
    let mut statuses = Vec::new();
    for node in state.catalog.nodes() {
        let health = state.backend.node_health(&node.name).await;
        let (reachable, ready) = match health {
            Ok(h) => (h.reachable, h.ready),
            Err(_) => (false, false),
        };
        statuses.push(NodeStatus {
            name: node.name.clone(),
            role: node.role.clone(),
            gpu_enabled: node.gpu_enabled,
            reachable,
            ready,
        });
    }
    Json(statuses)
}
