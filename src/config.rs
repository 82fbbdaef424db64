//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Admin API configuration
    pub admin: AdminConfig,
    /// OAuth issuance and verification
    pub oauth: OAuthConfig,
    /// Rate limiting per surface
    pub rate_limit: RateLimitsConfig,
    /// Shared LRU cache
    pub cache: CacheConfig,
    /// Seed records for the in-memory feed token store
    pub feeds: FeedsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Take the caller IP from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            trust_forwarded_headers: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Static admin bearer token.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random token).
    /// When unset, only OAuth access tokens are accepted on admin routes.
    pub bearer_token: Option<String>,
}

impl AdminConfig {
    /// Resolve the bearer token (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_bearer_token(&self) -> Option<String> {
        self.bearer_token.as_ref().map(|token| {
            if token == "auto" {
                use rand::Rng;
                let random_bytes: [u8; 32] = rand::rng().random();
                format!(
                    "fwadm_{}",
                    base64::Engine::encode(
                        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                        random_bytes
                    )
                )
            } else {
                resolve_secret(token)
            }
        })
    }
}

/// OAuth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// `iss` claim of issued access tokens
    pub issuer: String,
    /// Lifetime of issued access tokens
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Clock-skew tolerance applied to `exp` during verification
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// PKCS#8 PEM file holding the signing key. Generated on first start
    /// when missing. Supports `~` expansion. Unset = ephemeral key.
    pub key_path: Option<String>,
    /// Registered machine clients
    pub clients: Vec<ClientConfig>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: "feed-warden".to_string(),
            token_ttl: Duration::from_secs(600),
            leeway: Duration::from_secs(30),
            key_path: None,
            clients: Vec::new(),
        }
    }
}

impl OAuthConfig {
    /// Key path with `~` expanded to the home directory
    #[must_use]
    pub fn resolved_key_path(&self) -> Option<PathBuf> {
        self.key_path.as_ref().map(|p| expand_home(p))
    }
}

/// A registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,
    /// Client secret (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Scopes this client may request. Empty = no scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientConfig {
    /// Resolve the secret (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// Rate limiting per surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Feed routes, keyed by caller IP
    pub feeds: RateLimitConfig,
    /// Token endpoint, keyed by caller IP and by client id
    pub oauth: RateLimitConfig,
    /// Admin routes, keyed by caller IP
    pub admin: RateLimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            feeds: RateLimitConfig::default(),
            oauth: RateLimitConfig {
                max_requests: 10,
                ..RateLimitConfig::default()
            },
            admin: RateLimitConfig {
                max_requests: 30,
                ..RateLimitConfig::default()
            },
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Sliding window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Lockout after the first failure; doubles with each further failure
    #[serde(with = "humantime_serde")]
    pub penalty_base: Duration,
    /// Upper bound for a single lockout
    #[serde(with = "humantime_serde")]
    pub penalty_max: Duration,
    /// How often idle identities are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 120,
            window: Duration::from_secs(60),
            penalty_base: Duration::from_secs(2),
            penalty_max: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Seed records for the in-memory feed token store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeedsConfig {
    /// Tokens for directory-backed feeds
    pub directory_tokens: Vec<FeedTokenSeed>,
    /// Tokens for curated feeds
    pub curated_tokens: Vec<FeedTokenSeed>,
}

/// A pre-provisioned feed token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTokenSeed {
    /// Token value (supports `env:VAR_NAME`)
    pub token: String,
    /// Feed the token grants access to
    pub feed_id: String,
}

impl FeedTokenSeed {
    /// Resolve the token value (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_token(&self) -> String {
        resolve_secret(&self.token)
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (FEED_WARDEN_ prefix)
        figment = figment.merge(Env::prefixed("FEED_WARDEN_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime
    fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(Error::Config("cache.capacity must be at least 1".to_string()));
        }
        if self.oauth.token_ttl.is_zero() {
            return Err(Error::Config("oauth.token_ttl must be positive".to_string()));
        }
        for (name, limit) in [
            ("feeds", &self.rate_limit.feeds),
            ("oauth", &self.rate_limit.oauth),
            ("admin", &self.rate_limit.admin),
        ] {
            if limit.enabled && (limit.max_requests == 0 || limit.window.is_zero()) {
                return Err(Error::Config(format!(
                    "rate_limit.{name} needs max_requests > 0 and a non-zero window"
                )));
            }
            if limit.enabled && limit.penalty_base.is_zero() {
                return Err(Error::Config(format!(
                    "rate_limit.{name}.penalty_base must be positive"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for client in &self.oauth.clients {
            if !seen.insert(client.client_id.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate OAuth client_id: {}",
                    client.client_id
                )));
            }
            if let Some(var) = unset_env_reference(&client.client_secret) {
                return Err(Error::Config(format!(
                    "oauth client {} secret refers to unset variable {var}",
                    client.client_id
                )));
            }
        }
        for seed in self
            .feeds
            .directory_tokens
            .iter()
            .chain(&self.feeds.curated_tokens)
        {
            if let Some(var) = unset_env_reference(&seed.token) {
                return Err(Error::Config(format!(
                    "feed token for {} refers to unset variable {var}",
                    seed.feed_id
                )));
            }
        }
        Ok(())
    }
}

/// Expand `env:VAR_NAME` to the variable's value, falling back to the literal
fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Name of the variable when `value` is `env:VAR` and `VAR` is unset
fn unset_env_reference(value: &str) -> Option<&str> {
    value
        .strip_prefix("env:")
        .filter(|var| env::var(var).is_err())
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() > 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "1h", "100ms" or a bare number of seconds
    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be tried before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
