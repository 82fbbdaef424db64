//! OAuth endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/oauth/jwks` | Public signing keys |
//! | `POST` | `/oauth/token` | Client-credentials grant |

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::client_ip::ClientIp;
use super::router::AppState;
use crate::oauth::{ClientCredentials, ip_identity};
use crate::{Error, Result};

/// JWKS responses may be cached by clients for an hour
const JWKS_CACHE_CONTROL: &str = "public, max-age=3600";

/// `GET /oauth/jwks`
///
/// Built from the key ring on every request, so a rotation or a pruned
/// retired key is reflected immediately. Client-side caching is left to
/// `Cache-Control`.
pub async fn jwks(State(state): State<Arc<AppState>>) -> Result<Response> {
    let jwks = state.keys.public_jwks().await?;

    Ok((
        [(header::CACHE_CONTROL, HeaderValue::from_static(JWKS_CACHE_CONTROL))],
        Json(jwks),
    )
        .into_response())
}

/// `POST /oauth/token`
///
/// Parameters come from an `application/x-www-form-urlencoded` body.
/// Client credentials may instead be sent with HTTP Basic auth, which
/// takes precedence over body parameters.
pub async fn token(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    form: std::result::Result<Form<ClientCredentials>, FormRejection>,
) -> Result<Response> {
    // Malformed requests never reach the issuer, so they are counted here
    let Form(mut credentials) = match form {
        Ok(form) => form,
        Err(rejection) => {
            state.limits.oauth.check(&ip_identity(ip)).into_result()?;
            return Err(Error::InvalidRequest(rejection.body_text()));
        }
    };

    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        credentials.client_id = client_id;
        credentials.client_secret = client_secret;
    }

    let issued = state.issuer.issue(&credentials, ip).await?;

    // RFC 6749 section 5.1: token responses must not be cached
    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        Json(issued),
    )
        .into_response())
}

/// Decode `Authorization: Basic base64(client_id:client_secret)`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic ").or_else(|| v.strip_prefix("basic ")))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}
