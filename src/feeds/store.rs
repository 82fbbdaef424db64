//! Feed token store: the persistence boundary of the resolver.
//!
//! The [`FeedTokenStore`] trait is the contract with whatever owns feed
//! records (a database in the host application). Every operation is scoped
//! to one [`TokenNamespace`]; cross-namespace policy lives in the resolver.
//!
//! [`InMemoryFeedTokenStore`] keeps one `DashMap` per namespace and can be
//! seeded from configuration. It is what the standalone server runs with.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use tracing::debug;

use super::{FeedTokenRecord, TokenNamespace};
use crate::Result;
use crate::config::FeedsConfig;

/// Trait abstracting the feed token storage backend.
///
/// Implementations must be `Send + Sync`; touches and revocations for
/// different tokens may run concurrently.
#[async_trait::async_trait]
pub trait FeedTokenStore: Send + Sync + 'static {
    /// Look up a record, revoked or not.
    async fn lookup(&self, namespace: TokenNamespace, token: &str)
    -> Result<Option<FeedTokenRecord>>;

    /// Record a use of `token` at `at`.
    ///
    /// `last_used_at` never moves backwards. Returns `false` if no active
    /// record exists.
    async fn touch(&self, namespace: TokenNamespace, token: &str, at: DateTime<Utc>)
    -> Result<bool>;

    /// Soft-delete a record.
    ///
    /// Returns `true` only if an active record existed and was changed.
    async fn revoke(&self, namespace: TokenNamespace, token: &str) -> Result<bool>;

    /// Insert a new record.
    ///
    /// Returns `false` (and changes nothing) if the token already exists in
    /// the record's namespace.
    async fn insert(&self, record: FeedTokenRecord) -> Result<bool>;
}

/// Generate a cryptographically random feed token.
///
/// Format: `fw_<43-char URL-safe base64>` (256 bits of entropy).
#[must_use]
pub fn generate_feed_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    format!(
        "fw_{}",
        base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        )
    )
}

/// In-memory feed token store, one `DashMap` per namespace.
pub struct InMemoryFeedTokenStore {
    directory: DashMap<String, FeedTokenRecord>,
    curated: DashMap<String, FeedTokenRecord>,
}

impl InMemoryFeedTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: DashMap::new(),
            curated: DashMap::new(),
        }
    }

    /// Create a store holding the tokens listed in configuration.
    ///
    /// A later seed with the same token replaces an earlier one in the same
    /// namespace.
    #[must_use]
    pub fn from_config(config: &FeedsConfig) -> Self {
        let store = Self::new();
        let seeds = config
            .directory_tokens
            .iter()
            .map(|s| (TokenNamespace::Directory, s))
            .chain(
                config
                    .curated_tokens
                    .iter()
                    .map(|s| (TokenNamespace::Curated, s)),
            );
        for (namespace, seed) in seeds {
            let record = FeedTokenRecord::new(namespace, seed.resolve_token(), &seed.feed_id);
            store.map(namespace).insert(record.token.clone(), record);
        }
        debug!(
            directory = store.directory.len(),
            curated = store.curated.len(),
            "Seeded feed token store"
        );
        store
    }

    /// Number of records (including revoked) in a namespace
    #[must_use]
    pub fn len(&self, namespace: TokenNamespace) -> usize {
        self.map(namespace).len()
    }

    /// Whether both namespaces are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty() && self.curated.is_empty()
    }

    /// Copy of a record, for diagnostics and tests
    #[must_use]
    pub fn get(&self, namespace: TokenNamespace, token: &str) -> Option<FeedTokenRecord> {
        self.map(namespace).get(token).map(|r| r.clone())
    }

    fn map(&self, namespace: TokenNamespace) -> &DashMap<String, FeedTokenRecord> {
        match namespace {
            TokenNamespace::Directory => &self.directory,
            TokenNamespace::Curated => &self.curated,
        }
    }
}

impl Default for InMemoryFeedTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FeedTokenStore for InMemoryFeedTokenStore {
    async fn lookup(
        &self,
        namespace: TokenNamespace,
        token: &str,
    ) -> Result<Option<FeedTokenRecord>> {
        Ok(self.get(namespace, token))
    }

    async fn touch(
        &self,
        namespace: TokenNamespace,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut record) = self.map(namespace).get_mut(token) else {
            return Ok(false);
        };
        if record.revoked {
            return Ok(false);
        }
        record.last_used_at = Some(record.last_used_at.map_or(at, |prev| prev.max(at)));
        Ok(true)
    }

    async fn revoke(&self, namespace: TokenNamespace, token: &str) -> Result<bool> {
        let Some(mut record) = self.map(namespace).get_mut(token) else {
            return Ok(false);
        };
        if record.revoked {
            return Ok(false);
        }
        record.revoked = true;
        Ok(true)
    }

    async fn insert(&self, record: FeedTokenRecord) -> Result<bool> {
        match self.map(record.namespace).entry(record.token.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }
}
