//! OAuth client registry

use std::collections::HashMap;

use subtle::ConstantTimeEq;

use crate::config::ClientConfig;

/// A client that passed authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    /// Client identifier
    pub client_id: String,
    /// Scopes the client may be granted
    pub scopes: Vec<String>,
}

impl RegisteredClient {
    /// Whether the client may be granted `scope`
    #[must_use]
    pub fn allows(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Source of truth for machine clients.
///
/// `authenticate` must not reveal, through its result or its timing,
/// whether the id or the secret was wrong.
#[async_trait::async_trait]
pub trait ClientRegistry: Send + Sync + 'static {
    /// Return the client if `client_id` exists and `client_secret` matches
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Option<RegisteredClient>;
}

struct StaticClient {
    secret: String,
    scopes: Vec<String>,
}

/// Registry built from `oauth.clients` in configuration
pub struct StaticClientRegistry {
    clients: HashMap<String, StaticClient>,
    /// Compared against when the id is unknown, so both paths do the same work
    decoy_secret: String,
}

impl StaticClientRegistry {
    /// Build from configuration, resolving `env:` secrets
    #[must_use]
    pub fn from_config(clients: &[ClientConfig]) -> Self {
        let clients = clients
            .iter()
            .map(|c| {
                (
                    c.client_id.clone(),
                    StaticClient {
                        secret: c.resolve_secret(),
                        scopes: c.scopes.clone(),
                    },
                )
            })
            .collect();
        Self {
            clients,
            decoy_secret: crate::feeds::generate_feed_token(),
        }
    }

    /// Number of registered clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait::async_trait]
impl ClientRegistry for StaticClientRegistry {
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Option<RegisteredClient> {
        let client = self.clients.get(client_id);
        let expected = client.map_or(self.decoy_secret.as_str(), |c| c.secret.as_str());

        let secret_ok: bool = client_secret.as_bytes().ct_eq(expected.as_bytes()).into();
        let client = client?;
        // An empty configured secret never authenticates
        if !secret_ok || client.secret.is_empty() {
            return None;
        }

        Some(RegisteredClient {
            client_id: client_id.to_string(),
            scopes: client.scopes.clone(),
        })
    }
}
