//! Feed warden server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::feeds::{FeedTokenStore, InMemoryFeedTokenStore};
use crate::rate_limiter::spawn_sweeper;
use crate::{Error, Result};

/// Access-control server
pub struct Warden {
    /// Configuration
    config: Config,
    /// Shared state
    state: Arc<AppState>,
}

impl Warden {
    /// Create a server backed by the in-memory store seeded from config.
    ///
    /// The signing key is initialised here, so unusable key material fails
    /// startup instead of the first request.
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn FeedTokenStore> =
            Arc::new(InMemoryFeedTokenStore::from_config(&config.feeds));
        Self::with_store(config, store).await
    }

    /// Create a server backed by an external feed token store
    pub async fn with_store(config: Config, store: Arc<dyn FeedTokenStore>) -> Result<Self> {
        let state = Arc::new(AppState::new(&config, store));
        state.keys.init().await?;
        Ok(Self { config, state })
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run until Ctrl+C / SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let limits = &self.config.rate_limit;
        for (limiter, config) in self
            .state
            .limits
            .all()
            .into_iter()
            .zip([&limits.feeds, &limits.oauth, &limits.admin])
        {
            if config.enabled {
                spawn_sweeper(Arc::clone(limiter), config.sweep_interval, shutdown_tx.subscribe());
            }
        }

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("FEED WARDEN v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            issuer = %self.config.oauth.issuer,
            clients = self.config.oauth.clients.len(),
            token_ttl_secs = self.config.oauth.token_ttl.as_secs(),
            "OAuth client-credentials enabled"
        );
        if self.state.admin_token.is_none() {
            info!("No static admin token; admin API accepts OAuth access tokens only");
        }
        if self.config.server.trust_forwarded_headers {
            warn!("Trusting X-Forwarded-For; only safe behind a reverse proxy");
        }
        info!("  GET  http://{addr}/oauth/jwks");
        info!("  POST http://{addr}/oauth/token");
        info!("  GET  http://{addr}/feeds/{{token}}");
        info!("============================================================");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
