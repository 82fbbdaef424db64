//! Feed access endpoints
//!
//! Rendering the RSS document and streaming media bytes belong to the host
//! application; these handlers perform the access decision and return the
//! resolved feed as JSON.
//!
//! A feed fetch records usage. Media requests arrive in bursts of byte-range
//! requests and only read.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::client_ip::ClientIp;
use super::router::AppState;
use crate::audit::token_hint;
use crate::feeds::{AccessMode, ResolvedFeed, TokenNamespace};
use crate::oauth::ip_identity;
use crate::{Error, Result};

/// Access decision returned to the renderer
#[derive(Debug, Serialize)]
pub struct FeedAccess {
    /// Namespace the token resolved in
    pub namespace: TokenNamespace,
    /// Authorized feed
    pub feed_id: String,
    /// Last recorded feed fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Requested media path, for media requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
}

impl FeedAccess {
    fn new(feed: ResolvedFeed, media_path: Option<String>) -> Self {
        Self {
            namespace: feed.namespace,
            feed_id: feed.feed_id,
            last_used_at: feed.last_used_at,
            media_path,
        }
    }
}

/// Rate-limit, then resolve; unknown tokens cost the caller a strike
async fn authorize(
    state: &AppState,
    ip: Option<std::net::IpAddr>,
    token: &str,
    mode: AccessMode,
) -> Result<ResolvedFeed> {
    let identity = ip_identity(ip);
    state.limits.feeds.check(&identity).into_result()?;

    match state.resolver.resolve(token, mode).await {
        Err(Error::NotFound) => {
            let penalty = state.limits.feeds.penalize(&identity);
            debug!(
                ip = ?ip,
                token = %token_hint(token),
                penalty_ms = penalty.as_millis() as u64,
                "Unknown feed token"
            );
            Err(Error::NotFound)
        }
        other => other,
    }
}

/// `GET /feeds/{token}`
pub async fn feed(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Path(token): Path<String>,
) -> Result<Json<FeedAccess>> {
    let feed = authorize(&state, ip, &token, AccessMode::Touch).await?;
    Ok(Json(FeedAccess::new(feed, None)))
}

/// `GET /feeds/{token}/media/{*path}`
pub async fn media(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Path((token, path)): Path<(String, String)>,
) -> Result<Json<FeedAccess>> {
    let feed = authorize(&state, ip, &token, AccessMode::ReadOnly).await?;
    Ok(Json(FeedAccess::new(feed, Some(path))))
}
