//! Audit logging for access-control events.
//!
//! Every event is emitted via `tracing::info!` on the `audit` target, with
//! the event serialized as JSON in the `audit` field, so the trail can be
//! split from operational logs with `RUST_LOG=audit=info`.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `access_token.issued` | A client-credentials grant succeeded |
//! | `access_token.denied` | A grant was refused (bad client, scope, rate limit) |
//! | `feed_token.issued` | A new feed token was created |
//! | `feed_token.revoked` | A feed token was revoked via the admin API |
//! | `signing_key.rotated` | The active signing key was replaced |
//! | `admin.denied` | An admin request failed authentication |
//!
//! Feed tokens are secrets; events carry only a short prefix of them.

use std::net::IpAddr;

use serde::Serialize;

use crate::feeds::TokenNamespace;

/// Number of leading characters of a secret kept in logs
const HINT_LEN: usize = 6;

/// Shorten a secret to a loggable prefix
#[must_use]
pub fn token_hint(token: &str) -> String {
    let prefix: String = token.chars().take(HINT_LEN).collect();
    format!("{prefix}...")
}

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"access_token.issued"`).
    pub event: &'static str,
    /// OAuth client the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// JTI of an issued access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Feed token namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<TokenNamespace>,
    /// Feed the token belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<String>,
    /// Redacted feed token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_hint: Option<String>,
    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Client IP address (when available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Internal reason for a denial. Never sent to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            client_id: None,
            jti: None,
            scope: None,
            namespace: None,
            feed_id: None,
            token_hint: None,
            kid: None,
            client_ip: None,
            reason: None,
        }
    }

    /// Construct an `access_token.issued` event.
    #[must_use]
    pub fn access_token_issued(
        client_id: &str,
        jti: &str,
        scope: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            jti: Some(jti.to_string()),
            scope: scope.map(str::to_string),
            client_ip,
            ..Self::new("access_token.issued")
        }
    }

    /// Construct an `access_token.denied` event.
    #[must_use]
    pub fn access_token_denied(
        client_id: Option<&str>,
        reason: impl Into<String>,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            client_id: client_id.map(str::to_string),
            reason: Some(reason.into()),
            client_ip,
            ..Self::new("access_token.denied")
        }
    }

    /// Construct a `feed_token.issued` event.
    #[must_use]
    pub fn feed_token_issued(namespace: TokenNamespace, feed_id: &str, token: &str) -> Self {
        Self {
            namespace: Some(namespace),
            feed_id: Some(feed_id.to_string()),
            token_hint: Some(token_hint(token)),
            ..Self::new("feed_token.issued")
        }
    }

    /// Construct a `feed_token.revoked` event.
    #[must_use]
    pub fn feed_token_revoked(namespace: TokenNamespace, token: &str) -> Self {
        Self {
            namespace: Some(namespace),
            token_hint: Some(token_hint(token)),
            ..Self::new("feed_token.revoked")
        }
    }

    /// Construct a `signing_key.rotated` event.
    #[must_use]
    pub fn key_rotated(new_kid: &str, retired_kid: Option<&str>) -> Self {
        Self {
            kid: Some(new_kid.to_string()),
            reason: retired_kid.map(|k| format!("retired {k}")),
            ..Self::new("signing_key.rotated")
        }
    }

    /// Construct an `admin.denied` event.
    #[must_use]
    pub fn admin_denied(reason: impl Into<String>, client_ip: Option<IpAddr>) -> Self {
        Self {
            reason: Some(reason.into()),
            client_ip,
            ..Self::new("admin.denied")
        }
    }
}

/// Emit an audit event on the `audit` target.
///
/// ```text
/// INFO audit: feed-warden audit audit={"event":"access_token.issued",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(target: "audit", audit = %json, "feed-warden audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
