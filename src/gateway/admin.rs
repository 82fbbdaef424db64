//! Admin API
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/admin/feed-tokens` | Issue a feed token |
//! | `DELETE` | `/admin/feed-tokens/{token}` | Revoke a feed token |
//! | `GET` | `/admin/cache` | Cache statistics and keys |
//! | `GET` | `/admin/cache?key=<key>` | One cached value |
//! | `POST` | `/admin/keys/rotate` | Replace the signing key |
//!
//! ## Authentication
//!
//! `Authorization: Bearer <token>` where the token is either the static
//! `admin.bearer_token` or an access token issued by `/oauth/token`.
//! Failed attempts penalize the caller IP on the admin limiter.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::client_ip::resolve_client_ip;
use super::router::AppState;
use crate::audit::{self, AuditEvent, token_hint};
use crate::feeds::TokenNamespace;
use crate::oauth::ip_identity;
use crate::{Error, Result};

/// Who passed admin authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminPrincipal {
    /// The static admin token
    StaticToken,
    /// An OAuth client holding a valid access token
    Client(String),
}

impl AdminPrincipal {
    /// Name for logs
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::StaticToken => "admin-token",
            Self::Client(id) => id,
        }
    }
}

/// Extract the bearer token from the `Authorization` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Admin authentication middleware
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = resolve_client_ip(
        request.headers(),
        request.extensions(),
        state.trust_forwarded_headers,
    );
    let identity = ip_identity(ip);

    if let Err(e) = state.limits.admin.check(&identity).into_result() {
        return e.into_response();
    }

    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %request.uri().path(), "Admin request without bearer token");
        return Error::InvalidToken("missing bearer token".to_string()).into_response();
    };

    let static_match = state
        .admin_token
        .as_ref()
        .is_some_and(|admin| token.as_bytes().ct_eq(admin.as_bytes()).into());

    let principal = if static_match {
        AdminPrincipal::StaticToken
    } else {
        match state.keys.verify(token).await {
            Ok(claims) => AdminPrincipal::Client(claims.sub),
            Err(e) => {
                state.limits.admin.penalize(&identity);
                warn!(ip = ?ip, error = %e, path = %request.uri().path(), "Admin authentication failed");
                audit::emit(&AuditEvent::admin_denied(e.to_string(), ip));
                return e.into_response();
            }
        }
    };

    debug!(principal = %principal.name(), path = %request.uri().path(), "Admin request authenticated");
    request.extensions_mut().insert(principal);
    next.run(request).await
}

/// Body of `POST /admin/feed-tokens`
#[derive(Debug, Deserialize)]
pub struct IssueFeedToken {
    /// Namespace to create the token in
    pub namespace: TokenNamespace,
    /// Feed the token grants access to
    pub feed_id: String,
}

/// `POST /admin/feed-tokens`
pub async fn issue_feed_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IssueFeedToken>,
) -> Result<(StatusCode, Json<Value>)> {
    let record = state.resolver.issue(body.namespace, &body.feed_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": record.token,
            "namespace": record.namespace,
            "feed_id": record.feed_id,
            "created_at": record.created_at,
        })),
    ))
}

/// `DELETE /admin/feed-tokens/{token}`
pub async fn revoke_feed_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<StatusCode> {
    let namespace = state.resolver.revoke(&token).await?;
    info!(namespace = %namespace, token = %token_hint(&token), "Feed token revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// Query for `GET /admin/cache`
#[derive(Debug, Deserialize)]
pub struct CacheQuery {
    /// Single key to look up
    pub key: Option<String>,
}

/// `GET /admin/cache[?key=<key>]`
///
/// Reads with `peek`, so inspection never changes eviction order.
pub async fn inspect_cache(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheQuery>,
) -> Result<Json<Value>> {
    if let Some(key) = query.key {
        let value = state.cache.peek(&key).ok_or(Error::NotFound)?;
        return Ok(Json(json!({ "key": key, "value": value })));
    }

    Ok(Json(json!({
        "stats": state.cache.stats(),
        "keys": state.cache.keys(),
    })))
}

/// `POST /admin/keys/rotate`
pub async fn rotate_keys(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let kid = state.keys.rotate().await?;
    Ok(Json(json!({ "kid": kid })))
}
