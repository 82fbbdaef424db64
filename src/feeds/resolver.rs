//! Cross-namespace feed token resolution

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    AccessMode, FeedTokenRecord, FeedTokenStore, RESOLUTION_ORDER, ResolvedFeed, TokenNamespace,
    generate_feed_token,
};
use crate::audit::{self, AuditEvent, token_hint};
use crate::cache::LruCache;
use crate::{Error, Result};

/// Attempts at drawing a token value unused in every namespace
const ISSUE_ATTEMPTS: usize = 4;

/// Cache key for a memoised read-only resolution
fn cache_key(token: &str) -> String {
    format!("feed-token:{token}")
}

/// Resolves feed tokens against a [`FeedTokenStore`].
///
/// Read-only resolutions are memoised in the shared cache. Only positive
/// results are cached, so guessing tokens cannot flood it.
///
/// Every revocation bumps a revocation epoch. A resolution only memoises
/// its result if no revocation happened since its store lookup began, so
/// an in-flight request cannot put a just-revoked token back in the cache.
pub struct FeedTokenResolver {
    store: Arc<dyn FeedTokenStore>,
    cache: Arc<LruCache<Value>>,
    revocation_epoch: Mutex<u64>,
}

impl FeedTokenResolver {
    /// Create a resolver over `store`, memoising into `cache`
    #[must_use]
    pub fn new(store: Arc<dyn FeedTokenStore>, cache: Arc<LruCache<Value>>) -> Self {
        Self {
            store,
            cache,
            revocation_epoch: Mutex::new(0),
        }
    }

    /// Resolve `token` to the feed it authorizes.
    ///
    /// Unknown and revoked tokens both yield [`Error::NotFound`]. In
    /// [`AccessMode::Touch`] the matching record's `last_used_at` is updated
    /// after the match; a failed update is logged and otherwise ignored.
    pub async fn resolve(&self, token: &str, mode: AccessMode) -> Result<ResolvedFeed> {
        if token.is_empty() {
            return Err(Error::NotFound);
        }
        let key = cache_key(token);

        if mode == AccessMode::ReadOnly {
            if let Some(feed) = self
                .cache
                .get(&key)
                .and_then(|v| serde_json::from_value::<ResolvedFeed>(v).ok())
            {
                return Ok(feed);
            }
        }

        let epoch = *self.revocation_epoch.lock();
        let Some(record) = self.find_active(token).await? else {
            debug!(token = %token_hint(token), "Feed token not found");
            return Err(Error::NotFound);
        };

        let mut feed = ResolvedFeed::from(&record);
        if mode == AccessMode::Touch {
            let now = Utc::now();
            match self.store.touch(record.namespace, token, now).await {
                Ok(true) => {
                    feed.last_used_at = Some(feed.last_used_at.map_or(now, |prev| prev.max(now)));
                }
                Ok(false) => {
                    debug!(
                        namespace = %record.namespace,
                        token = %token_hint(token),
                        "Feed token revoked during resolution"
                    );
                    return Err(Error::NotFound);
                }
                Err(e) => warn!(
                    namespace = %record.namespace,
                    token = %token_hint(token),
                    error = %e,
                    "Failed to record feed token usage"
                ),
            }
        }

        if let Ok(value) = serde_json::to_value(&feed) {
            let current = self.revocation_epoch.lock();
            if *current == epoch {
                self.cache.set(&key, value);
            }
        }
        Ok(feed)
    }

    /// Resolve without recording usage (media and artwork requests)
    pub async fn resolve_read_only(&self, token: &str) -> Result<ResolvedFeed> {
        self.resolve(token, AccessMode::ReadOnly).await
    }

    /// Resolve and record usage (feed fetches)
    pub async fn resolve_and_touch(&self, token: &str) -> Result<ResolvedFeed> {
        self.resolve(token, AccessMode::Touch).await
    }

    /// Revoke `token`, trying namespaces in resolution order.
    ///
    /// Returns the namespace the token was revoked in. Revoking an unknown
    /// or already revoked token yields [`Error::NotFound`].
    pub async fn revoke(&self, token: &str) -> Result<TokenNamespace> {
        let mut revoked = None;
        for namespace in RESOLUTION_ORDER {
            if self.store.revoke(namespace, token).await? {
                revoked = Some(namespace);
                break;
            }
        }

        // Invalidate after the store write; resolutions still in flight see a
        // new epoch and skip memoising
        {
            let mut epoch = self.revocation_epoch.lock();
            *epoch = epoch.wrapping_add(1);
            self.cache.remove(&cache_key(token));
        }

        let namespace = revoked.ok_or(Error::NotFound)?;
        audit::emit(&AuditEvent::feed_token_revoked(namespace, token));
        Ok(namespace)
    }

    /// Issue a fresh token for `feed_id` in `namespace`.
    ///
    /// The value is guaranteed not to exist in any namespace, so resolution
    /// order never has to break a tie for issued tokens.
    pub async fn issue(&self, namespace: TokenNamespace, feed_id: &str) -> Result<FeedTokenRecord> {
        if feed_id.trim().is_empty() {
            return Err(Error::InvalidRequest("feed_id is required".to_string()));
        }

        for _ in 0..ISSUE_ATTEMPTS {
            let token = generate_feed_token();
            if self.exists_anywhere(&token).await? {
                continue;
            }
            let record = FeedTokenRecord::new(namespace, token, feed_id);
            if self.store.insert(record.clone()).await? {
                audit::emit(&AuditEvent::feed_token_issued(namespace, feed_id, &record.token));
                return Ok(record);
            }
        }
        Err(Error::Internal(
            "Could not allocate a unique feed token".to_string(),
        ))
    }

    /// First active record in resolution order
    async fn find_active(&self, token: &str) -> Result<Option<FeedTokenRecord>> {
        for namespace in RESOLUTION_ORDER {
            if let Some(record) = self.store.lookup(namespace, token).await? {
                if record.is_active() {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn exists_anywhere(&self, token: &str) -> Result<bool> {
        for namespace in RESOLUTION_ORDER {
            if self.store.lookup(namespace, token).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
