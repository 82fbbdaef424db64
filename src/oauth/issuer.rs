//! Client-credentials grant (RFC 6749 section 4.4)
//!
//! Every attempt is counted against the caller IP and, once a client id is
//! known, against that client id too. Failed authentication penalizes both,
//! so credential stuffing from one address and password spraying across
//! addresses both run into growing lockouts.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::clients::{ClientRegistry, RegisteredClient};
use super::keys::{AccessClaims, KeyManager};
use crate::audit::{self, AuditEvent};
use crate::rate_limiter::RateLimiter;
use crate::{Error, Result};

/// The only supported grant
pub const CLIENT_CREDENTIALS: &str = "client_credentials";

/// Token request parameters, from the form body or HTTP Basic auth
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientCredentials {
    /// Must be `client_credentials`
    #[serde(default)]
    pub grant_type: String,
    /// Client identifier
    #[serde(default)]
    pub client_id: String,
    /// Client secret
    #[serde(default)]
    pub client_secret: String,
    /// Space-separated requested scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// RFC 6749 section 5.1 access token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Signed JWT
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Seconds until expiry
    pub expires_in: u64,
    /// Granted scope, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Rate limiter key for a caller address
#[must_use]
pub fn ip_identity(ip: Option<IpAddr>) -> String {
    ip.map_or_else(|| "ip:unknown".to_string(), |ip| format!("ip:{ip}"))
}

fn client_identity(client_id: &str) -> String {
    format!("client:{client_id}")
}

/// Issues short-lived access tokens to registered clients
pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    clients: Arc<dyn ClientRegistry>,
    limiter: Arc<RateLimiter>,
    token_ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer
    #[must_use]
    pub fn new(
        keys: Arc<KeyManager>,
        clients: Arc<dyn ClientRegistry>,
        limiter: Arc<RateLimiter>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            keys,
            clients,
            limiter,
            token_ttl,
        }
    }

    /// Run the client-credentials grant.
    ///
    /// Rate limits are checked before any credential work. A wrong client
    /// id and a wrong secret both produce [`Error::InvalidClient`].
    pub async fn issue(
        &self,
        credentials: &ClientCredentials,
        caller_ip: Option<IpAddr>,
    ) -> Result<IssuedToken> {
        let ip_key = ip_identity(caller_ip);
        let client_id = credentials.client_id.trim();
        let client_key = (!client_id.is_empty()).then(|| client_identity(client_id));

        let decision = self.limiter.check(&ip_key).into_result().and_then(|()| {
            client_key
                .as_deref()
                .map_or(Ok(()), |key| self.limiter.check(key).into_result())
        });
        if let Err(e) = decision {
            audit::emit(&AuditEvent::access_token_denied(
                Some(client_id).filter(|c| !c.is_empty()),
                "rate limited",
                caller_ip,
            ));
            return Err(e);
        }

        if credentials.grant_type != CLIENT_CREDENTIALS {
            debug!(grant_type = %credentials.grant_type, "Unsupported grant type");
            return Err(Error::UnsupportedGrantType(credentials.grant_type.clone()));
        }

        let client = match self
            .clients
            .authenticate(client_id, &credentials.client_secret)
            .await
        {
            Some(client) if !client_id.is_empty() => client,
            _ => {
                self.limiter.penalize(&ip_key);
                if let Some(key) = &client_key {
                    self.limiter.penalize(key);
                }
                warn!(client_id = %client_id, ip = ?caller_ip, "Client authentication failed");
                audit::emit(&AuditEvent::access_token_denied(
                    Some(client_id),
                    "bad client credentials",
                    caller_ip,
                ));
                return Err(Error::InvalidClient);
            }
        };

        let scope = match grant_scope(&client, credentials.scope.as_deref()) {
            Ok(scope) => scope,
            Err(e) => {
                audit::emit(&AuditEvent::access_token_denied(
                    Some(client_id),
                    e.to_string(),
                    caller_ip,
                ));
                return Err(e);
            }
        };

        let key = self.keys.signing_key().await?;
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let claims = AccessClaims {
            iss: self.keys.issuer().to_string(),
            sub: client.client_id.clone(),
            iat,
            exp: iat + self.token_ttl.as_secs(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope: scope.clone(),
        };
        let access_token = key.sign(&claims)?;

        audit::emit(&AuditEvent::access_token_issued(
            &client.client_id,
            &claims.jti,
            scope.as_deref(),
            caller_ip,
        ));

        Ok(IssuedToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.token_ttl.as_secs(),
            scope,
        })
    }
}

/// Decide the granted scope.
///
/// No request grants everything the client may have; an explicit request
/// must be a subset of it.
fn grant_scope(client: &RegisteredClient, requested: Option<&str>) -> Result<Option<String>> {
    let requested: Vec<&str> = requested
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    if requested.is_empty() {
        return Ok((!client.scopes.is_empty()).then(|| client.scopes.join(" ")));
    }

    let mut granted: Vec<&str> = Vec::with_capacity(requested.len());
    for scope in requested {
        if !client.allows(scope) {
            return Err(Error::InvalidScope(scope.to_string()));
        }
        if !granted.contains(&scope) {
            granted.push(scope);
        }
    }
    Ok(Some(granted.join(" ")))
}
