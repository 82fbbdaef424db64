//! HTTP router and shared state

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{admin, feeds, oauth};
use crate::cache::LruCache;
use crate::config::Config;
use crate::feeds::{FeedTokenResolver, FeedTokenStore};
use crate::oauth::{KeyManager, StaticClientRegistry, TokenIssuer};
use crate::rate_limiter::RateLimiter;

/// One limiter per surface, so feed traffic cannot starve the token
/// endpoint and vice versa
pub struct Limiters {
    /// Feed routes
    pub feeds: Arc<RateLimiter>,
    /// Token endpoint
    pub oauth: Arc<RateLimiter>,
    /// Admin routes
    pub admin: Arc<RateLimiter>,
}

impl Limiters {
    /// All limiters, for sweeping and test resets
    #[must_use]
    pub fn all(&self) -> [&Arc<RateLimiter>; 3] {
        [&self.feeds, &self.oauth, &self.admin]
    }
}

/// Shared application state
pub struct AppState {
    /// Feed token resolution
    pub resolver: Arc<FeedTokenResolver>,
    /// Signing keys and token verification
    pub keys: Arc<KeyManager>,
    /// Client-credentials grant
    pub issuer: Arc<TokenIssuer>,
    /// Shared LRU cache (feed resolutions)
    pub cache: Arc<LruCache<Value>>,
    /// Per-surface rate limiters
    pub limits: Limiters,
    /// Resolved static admin token
    pub admin_token: Option<String>,
    /// Take caller IP from proxy headers
    pub trust_forwarded_headers: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl AppState {
    /// Wire every component from configuration around `store`
    #[must_use]
    pub fn new(config: &Config, store: Arc<dyn FeedTokenStore>) -> Self {
        let cache = Arc::new(LruCache::new(config.cache.capacity));
        let limits = Limiters {
            feeds: Arc::new(RateLimiter::new("feeds", &config.rate_limit.feeds)),
            oauth: Arc::new(RateLimiter::new("oauth", &config.rate_limit.oauth)),
            admin: Arc::new(RateLimiter::new("admin", &config.rate_limit.admin)),
        };
        let keys = Arc::new(KeyManager::new(&config.oauth));
        let clients = Arc::new(StaticClientRegistry::from_config(&config.oauth.clients));
        let issuer = Arc::new(TokenIssuer::new(
            Arc::clone(&keys),
            clients,
            Arc::clone(&limits.oauth),
            config.oauth.token_ttl,
        ));

        let admin_token = config.admin.resolve_bearer_token();
        if config.admin.bearer_token.as_deref() == Some("auto") {
            if let Some(ref token) = admin_token {
                tracing::info!("Auto-generated admin token: {}", token);
            }
        }

        Self {
            resolver: Arc::new(FeedTokenResolver::new(store, Arc::clone(&cache))),
            keys,
            issuer,
            cache,
            limits,
            admin_token,
            trust_forwarded_headers: config.server.trust_forwarded_headers,
            request_timeout: config.server.request_timeout,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/feed-tokens", post(admin::issue_feed_token))
        .route(
            "/admin/feed-tokens/{token}",
            delete(admin::revoke_feed_token).fallback(|| async { method_not_allowed("DELETE") }),
        )
        .route("/admin/cache", get(admin::inspect_cache))
        .route("/admin/keys/rotate", post(admin::rotate_keys))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admin::admin_auth,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/oauth/jwks",
            get(oauth::jwks).fallback(|| async { method_not_allowed("GET") }),
        )
        .route("/oauth/token", post(oauth::token))
        .route("/feeds/{token}", get(feeds::feed))
        .route("/feeds/{token}/media/{*path}", get(feeds::media))
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(state.request_timeout))
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

/// `405` with the single permitted method in `Allow`
fn method_not_allowed(allow: &'static str) -> Response {
    let mut response = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": "method_not_allowed",
            "error_description": format!("Only {allow} is allowed"),
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
