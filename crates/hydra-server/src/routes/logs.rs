//! Activity log routes: `/logs/*`
//!
//! Historical reads bind to the activity log; live tails are server-sent
//! event streams over the in-process event bus, heartbeating every 30s so
//! intermediate proxies do not time the connection out.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Extension, Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;
use hydra_core::ControlPlaneEvent;
use hydra_store::models::ActivityLogEntry;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{username}", get(recent))
        .route("/{username}/stream", get(stream_for_user))
        .route("/admin/stream", get(stream_all))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

const DEFAULT_RECENT_LIMIT: i64 = 100;

async fn recent(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<ActivityLogEntry>>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not read logs for '{username}'", auth.username)));
    }
    let entries = state.activity.recent(&username, query.limit.unwrap_or(DEFAULT_RECENT_LIMIT)).await?;
    Ok(Json(entries))
}

fn event_username(event: &ControlPlaneEvent) -> &str {
    match event {
        ControlPlaneEvent::MigrationStep { username, .. }
        | ControlPlaneEvent::MigrationFailed { username, .. }
        | ControlPlaneEvent::SecurityFinding { username, .. }
        | ControlPlaneEvent::ActivityLogged { username, .. } => username,
    }
}

fn to_sse_stream(
    mut rx: broadcast::Receiver<ControlPlaneEvent>,
    username_filter: Option<String>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream_from_broadcast(rx, username_filter)
}

/// Hand-rolled `futures::stream::unfold` since the workspace has no
/// `async-stream` dependency: poll the receiver, skip lagged gaps, filter by
/// username when one is given, and end the stream only when the bus itself
/// is dropped.
fn async_stream_from_broadcast(
    rx: broadcast::Receiver<ControlPlaneEvent>,
    username_filter: Option<String>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((rx, username_filter), |(mut rx, filter)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(ref want) = filter {
                        if event_username(&event) != want {
                            continue;
                        }
                    }
                    let payload = serde_json::to_string(&SseEvent::from(&event)).unwrap_or_default();
                    return Some((Ok(Event::default().data(payload)), (rx, filter)));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[derive(Debug, serde::Serialize)]
struct SseEvent {
    kind: &'static str,
    username: String,
    detail: serde_json::Value,
}

impl From<&ControlPlaneEvent> for SseEvent {
    fn from(event: &ControlPlaneEvent) -> Self {
        match event {
            ControlPlaneEvent::MigrationStep { username, migration_id, step, message } => Self {
                kind: "migration_step",
                username: username.clone(),
                detail: serde_json::json!({ "migration_id": migration_id, "step": step, "message": message }),
            },
            ControlPlaneEvent::MigrationFailed { username, migration_id, reason } => Self {
                kind: "migration_failed",
                username: username.clone(),
                detail: serde_json::json!({ "migration_id": migration_id, "reason": reason }),
            },
            ControlPlaneEvent::SecurityFinding { username, kind, severity, detail } => Self {
                kind: "security_finding",
                username: username.clone(),
                detail: serde_json::json!({ "kind": kind, "severity": severity, "detail": detail }),
            },
            ControlPlaneEvent::ActivityLogged { username, category, action, success } => Self {
                kind: "activity_logged",
                username: username.clone(),
                detail: serde_json::json!({ "category": category, "action": action, "success": success }),
            },
        }
    }
}

async fn stream_for_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not stream logs for '{username}'", auth.username)));
    }
    let rx = state.events.subscribe();
    Ok(Sse::new(to_sse_stream(rx, Some(username))).keep_alive(KeepAlive::new().interval(Duration::from_secs(30))))
}

async fn stream_all(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if !auth.is_privileged() {
        return Err(AppError::Forbidden("only faculty or admins may stream the full activity log".to_owned()));
    }
    let rx = state.events.subscribe();
    Ok(Sse::new(to_sse_stream(rx, None)).keep_alive(KeepAlive::new().interval(Duration::from_secs(30))))
}
