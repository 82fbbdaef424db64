//! Error types for feed-warden

use std::io;
use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for feed-warden
pub type Result<T> = std::result::Result<T, Error>;

/// Access-control errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token or client unknown, or revoked
    #[error("Not found")]
    NotFound,

    /// Caller exceeded its request budget or is serving a penalty lockout
    #[error("Rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// How long the caller should wait before retrying
        retry_after: Duration,
    },

    /// Access token is malformed, has a bad signature, an unknown `kid`
    /// or the wrong issuer
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Access token is past its `exp`
    #[error("Token expired")]
    TokenExpired,

    /// Client authentication failed (deliberately unspecific)
    #[error("Invalid client")]
    InvalidClient,

    /// Requested scope exceeds what the client may be granted
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Grant type other than `client_credentials`
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Signing key could not be generated, loaded or persisted
    #[error("Key initialization failed: {0}")]
    KeyInitialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT encoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error is surfaced as
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidToken(_) | Self::TokenExpired | Self::InvalidClient => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidScope(_) | Self::UnsupportedGrantType(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code (RFC 6749 section 5.2 names where one applies)
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidToken(_) | Self::TokenExpired => "invalid_token",
            Self::InvalidClient => "invalid_client",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidRequest(_) => "invalid_request",
            _ => "server_error",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Never distinguishes an unknown token from a revoked one, or a wrong
    /// client id from a wrong secret.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound => "Not found".to_string(),
            Self::RateLimited { retry_after } => {
                format!("Too many requests, retry after {}s", retry_after_secs(*retry_after))
            }
            Self::InvalidToken(_) => "Invalid access token".to_string(),
            Self::TokenExpired => "Access token expired".to_string(),
            Self::InvalidClient => "Client authentication failed".to_string(),
            Self::InvalidScope(_) => "Requested scope is not allowed".to_string(),
            Self::UnsupportedGrantType(_) => {
                "grant_type must be 'client_credentials'".to_string()
            }
            Self::InvalidRequest(detail) => detail.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero
#[must_use]
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.error_code(),
            "error_description": self.public_message(),
        }));
        let mut response = (status, body).into_response();

        match &self {
            Self::RateLimited { retry_after } => {
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs(*retry_after).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            Self::InvalidToken(_) | Self::TokenExpired => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            Self::InvalidClient => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"oauth\""),
                );
            }
            _ => {}
        }

        response
    }
}
