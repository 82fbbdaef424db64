//! Feed token resolution
//!
//! A feed token is an opaque string handed out in an RSS link. It lives in
//! exactly one of two namespaces: `directory` (feeds generated from a media
//! folder) or `curated` (hand-assembled playlists). The [`FeedTokenResolver`]
//! owns the cross-namespace policy:
//!
//! - namespaces are consulted in [`RESOLUTION_ORDER`]; the first active
//!   record wins and the remaining namespaces are not queried,
//! - revoked records are indistinguishable from unknown tokens,
//! - [`AccessMode::Touch`] records usage after a match, best-effort.
//!
//! Storage is external and reached through the [`FeedTokenStore`] trait.

pub mod resolver;
pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use resolver::FeedTokenResolver;
pub use store::{FeedTokenStore, InMemoryFeedTokenStore, generate_feed_token};

/// Namespace a feed token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenNamespace {
    /// Feeds generated from a media directory
    Directory,
    /// Hand-assembled feeds
    Curated,
}

/// Order in which namespaces are searched. Defines the tie-break when the
/// same token value exists in both.
pub const RESOLUTION_ORDER: [TokenNamespace; 2] =
    [TokenNamespace::Directory, TokenNamespace::Curated];

impl TokenNamespace {
    /// Lowercase name used in logs and JSON
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Curated => "curated",
        }
    }
}

impl fmt::Display for TokenNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a resolution records usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Pure lookup. Used by high-frequency media and artwork requests.
    ReadOnly,
    /// Lookup, then update `last_used_at`. Used by feed fetches.
    Touch,
}

/// A feed token record as held by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTokenRecord {
    /// Opaque token value
    pub token: String,
    /// Feed the token grants access to
    pub feed_id: String,
    /// Owning namespace
    pub namespace: TokenNamespace,
    /// Soft-delete flag; never cleared once set
    pub revoked: bool,
    /// Last feed fetch using this token
    pub last_used_at: Option<DateTime<Utc>>,
    /// When the token was issued
    pub created_at: DateTime<Utc>,
}

impl FeedTokenRecord {
    /// Create a fresh, unused record
    #[must_use]
    pub fn new(namespace: TokenNamespace, token: impl Into<String>, feed_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            feed_id: feed_id.into(),
            namespace,
            revoked: false,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the record can authorize access
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.revoked
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFeed {
    /// Namespace the token was found in
    pub namespace: TokenNamespace,
    /// Authorized feed
    pub feed_id: String,
    /// Usage timestamp as of the lookup
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&FeedTokenRecord> for ResolvedFeed {
    fn from(record: &FeedTokenRecord) -> Self {
        Self {
            namespace: record.namespace,
            feed_id: record.feed_id.clone(),
            last_used_at: record.last_used_at,
        }
    }
}
