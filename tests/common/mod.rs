//! Shared fixtures for router-level tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use feed_warden::Result;
use feed_warden::config::{ClientConfig, Config, FeedTokenSeed};
use feed_warden::feeds::{FeedTokenRecord, FeedTokenStore, InMemoryFeedTokenStore, TokenNamespace};
use feed_warden::gateway::{AppState, create_router};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const CLIENT_ID: &str = "backup-bot";
pub const CLIENT_SECRET: &str = "s3cret";
pub const DIRECTORY_TOKEN: &str = "dir-token-audiobooks";
pub const CURATED_TOKEN: &str = "cur-token-road-trip";

/// Configuration with one client, a static admin token and one seeded
/// token per namespace
pub fn config() -> Config {
    let mut config = Config::default();
    config.admin.bearer_token = Some(ADMIN_TOKEN.to_string());
    config.oauth.clients = vec![ClientConfig {
        client_id: CLIENT_ID.to_string(),
        client_secret: CLIENT_SECRET.to_string(),
        scopes: vec!["admin".to_string()],
    }];
    config.feeds.directory_tokens = vec![FeedTokenSeed {
        token: DIRECTORY_TOKEN.to_string(),
        feed_id: "audiobooks".to_string(),
    }];
    config.feeds.curated_tokens = vec![FeedTokenSeed {
        token: CURATED_TOKEN.to_string(),
        feed_id: "road-trip".to_string(),
    }];
    config
}

/// Router plus direct handles on its state and store
pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryFeedTokenStore>,
    pub router: Router,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryFeedTokenStore::from_config(&config.feeds));
        let state = Arc::new(AppState::new(&config, Arc::clone(&store) as Arc<dyn FeedTokenStore>));
        let router = create_router(Arc::clone(&state));
        Self {
            state,
            store,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        send(&self.router, request).await
    }
}

/// Response with the body already collected
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn request(method: Method, uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: Method, uri: &str, bearer: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn token_request(form: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/oauth/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

pub fn client_credentials_form() -> String {
    format!("grant_type=client_credentials&client_id={CLIENT_ID}&client_secret={CLIENT_SECRET}")
}

/// Attach a socket address the way `into_make_service_with_connect_info` does
pub fn from_addr(mut request: Request<Body>, addr: &str) -> Request<Body> {
    let addr: SocketAddr = addr.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// Obtain an access token through the token endpoint
pub async fn access_token(harness: &Harness) -> String {
    let response = harness.send(token_request(&client_credentials_form())).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    response.body["access_token"].as_str().unwrap().to_string()
}

/// Store wrapper counting every mutating call
#[derive(Default)]
pub struct RecordingStore {
    pub inner: InMemoryFeedTokenStore,
    pub lookups: AtomicUsize,
    pub writes: AtomicUsize,
}

impl RecordingStore {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedTokenStore for RecordingStore {
    async fn lookup(&self, namespace: TokenNamespace, token: &str) -> Result<Option<FeedTokenRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(namespace, token).await
    }

    async fn touch(&self, namespace: TokenNamespace, token: &str, at: DateTime<Utc>) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.touch(namespace, token, at).await
    }

    async fn revoke(&self, namespace: TokenNamespace, token: &str) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.revoke(namespace, token).await
    }

    async fn insert(&self, record: FeedTokenRecord) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(record).await
    }
}
