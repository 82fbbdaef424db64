//! Feed Warden
//!
//! Access-control subsystem for a personal media server.
//!
//! # Features
//!
//! - **Feed tokens**: opaque tokens resolved across the `directory` and
//!   `curated` namespaces, with read-only and usage-recording access modes
//! - **OAuth client credentials**: short-lived ES256 JWTs, rotating signing
//!   key, published JWKS
//! - **Rate limiting**: per-identity sliding windows with escalating
//!   penalties for failed attempts
//! - **LRU cache**: shared memoisation, inspectable through the admin API

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod feeds;
pub mod gateway;
pub mod oauth;
pub mod rate_limiter;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. Audit events use the `audit`
/// target, so `RUST_LOG=warn,audit=info` keeps only the audit trail.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to initialise tracing: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to initialise tracing: {e}"))),
    }
}
