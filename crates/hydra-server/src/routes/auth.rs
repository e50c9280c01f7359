//! Proxy auth-check callback: `/auth/verify`
//!
//! The reverse proxy forwards every request through this endpoint before
//! letting it reach a student workload, carrying the original request path
//! in `X-Forwarded-Uri` since the proxy's own path has already been
//! rewritten by the time this handler sees it. A 2xx response admits the
//! request; anything else denies it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Extension, Router};
use chrono::Utc;

use crate::middleware::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/verify", get(verify))
}

const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";
const SHARE_TOKEN_HEADER: &str = "x-hydra-share-token";

/// Pull the `{username}` segment out of a `/students/{username}/...` path.
fn extract_username(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("/students/")?;
    rest.split('/').next().filter(|s| !s.is_empty())
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
) -> StatusCode {
    let Some(forwarded_uri) = headers.get(FORWARDED_URI_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    let Some(target_username) = extract_username(forwarded_uri) else {
        return StatusCode::BAD_REQUEST;
    };

    if auth.may_act_on(target_username) {
        return StatusCode::OK;
    }

    if let Some(token) = headers.get(SHARE_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        if let Ok(link) = state.shares.get(token).await {
            if link.owner_username == target_username && link.is_valid(Utc::now()) {
                return StatusCode::OK;
            }
        }
    }

    StatusCode::FORBIDDEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_username_from_students_prefix() {
        assert_eq!(extract_username("/students/alice/vscode/foo"), Some("alice"));
        assert_eq!(extract_username("/students/alice/"), Some("alice"));
        assert_eq!(extract_username("/other/path"), None);
        assert_eq!(extract_username("/students/"), None);
    }
}
