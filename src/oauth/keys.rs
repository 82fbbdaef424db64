//! Signing key ring: ES256 key generation, persistence, JWKS publication
//! and access token verification.
//!
//! The ring holds one active key and the retired keys whose tokens may
//! still be in circulation. It is initialised lazily on first use; the
//! `OnceCell` guarantees concurrent first callers share one generation.
//!
//! Key identifiers are RFC 7638 JWK thumbprints, so a persisted key keeps
//! its `kid` across restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use rcgen::{KeyPair, PublicKeyData};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEvent};
use crate::config::OAuthConfig;
use crate::{Error, Result};

/// Uncompressed SEC1 point: 0x04 || X (32 bytes) || Y (32 bytes)
const P256_POINT_LEN: usize = 65;

/// Public half of a signing key as published in the JWKS document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Always `EC`
    pub kty: String,
    /// Always `P-256`
    pub crv: String,
    /// Base64url X coordinate
    pub x: String,
    /// Base64url Y coordinate
    pub y: String,
    /// Key identifier (RFC 7638 thumbprint)
    pub kid: String,
    /// Always `ES256`
    pub alg: String,
    /// Always `sig`
    #[serde(rename = "use")]
    pub key_use: String,
}

/// JWKS document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Active key first, then retired keys newest first
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find a key by `kid`
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// Claims carried by issued access tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer
    pub iss: String,
    /// Client id
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Unique token id
    pub jti: String,
    /// Space-separated granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl AccessClaims {
    /// Whether `scope` was granted
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .is_some_and(|s| s.split_whitespace().any(|granted| granted == scope))
    }
}

/// An ECDSA P-256 signing key with its derived public material
pub struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Jwk,
    pem: String,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a fresh key
    pub fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::KeyInitialization(format!("Failed to generate signing key: {e}")))?;
        Self::from_key_pair(&key_pair)
    }

    /// Load a key from PKCS#8 PEM
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(pem)
            .map_err(|e| Error::KeyInitialization(format!("Failed to parse signing key: {e}")))?;
        Self::from_key_pair(&key_pair)
    }

    fn from_key_pair(key_pair: &KeyPair) -> Result<Self> {
        let point = key_pair.public_key_raw();
        if point.len() != P256_POINT_LEN || point[0] != 0x04 {
            return Err(Error::KeyInitialization(
                "Signing key must be an ECDSA P-256 key".to_string(),
            ));
        }
        let x = URL_SAFE_NO_PAD.encode(&point[1..33]);
        let y = URL_SAFE_NO_PAD.encode(&point[33..]);
        let kid = thumbprint(&x, &y);

        let pem = key_pair.serialize_pem();
        let encoding = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| Error::KeyInitialization(format!("Unusable signing key: {e}")))?;
        let decoding = DecodingKey::from_ec_components(&x, &y)
            .map_err(|e| Error::KeyInitialization(format!("Unusable public key: {e}")))?;

        Ok(Self {
            jwk: Jwk {
                kty: "EC".to_string(),
                crv: "P-256".to_string(),
                x,
                y,
                kid: kid.clone(),
                alg: "ES256".to_string(),
                key_use: "sig".to_string(),
            },
            kid,
            encoding,
            decoding,
            pem,
        })
    }

    /// Key identifier
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public JWK
    #[must_use]
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// Sign `claims` as an ES256 JWT with this key's `kid` in the header
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding)?)
    }

    fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

/// RFC 7638 thumbprint of a P-256 public key
fn thumbprint(x: &str, y: &str) -> String {
    // Members in lexicographic order, no whitespace
    let canonical = format!(r#"{{"crv":"P-256","kty":"EC","x":"{x}","y":"{y}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

struct RetiredKey {
    key: Arc<SigningKey>,
    retired_at: DateTime<Utc>,
}

struct KeyRing {
    active: Arc<SigningKey>,
    /// Newest first
    retired: Vec<RetiredKey>,
}

impl KeyRing {
    fn find(&self, kid: &str) -> Option<Arc<SigningKey>> {
        if self.active.kid() == kid {
            return Some(Arc::clone(&self.active));
        }
        self.retired
            .iter()
            .find(|r| r.key.kid() == kid)
            .map(|r| Arc::clone(&r.key))
    }

    /// Drop retired keys whose every token has expired
    fn prune(&mut self, retention: Duration) {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;
        let before = self.retired.len();
        self.retired.retain(|r| r.retired_at > cutoff);
        if self.retired.len() < before {
            debug!(count = before - self.retired.len(), "Pruned retired signing keys");
        }
    }
}

/// Owns the signing key ring and is the trust root for access tokens
pub struct KeyManager {
    issuer: String,
    leeway: Duration,
    /// Retired keys stay verifiable for this long
    retention: Duration,
    key_path: Option<PathBuf>,
    ring: OnceCell<RwLock<KeyRing>>,
    /// Serializes rotations so the persisted key is always the active one
    rotation: tokio::sync::Mutex<()>,
}

impl KeyManager {
    /// Create a key manager. No key material is touched until first use.
    #[must_use]
    pub fn new(config: &OAuthConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            leeway: config.leeway,
            retention: config.token_ttl + config.leeway,
            key_path: config.resolved_key_path(),
            ring: OnceCell::new(),
            rotation: tokio::sync::Mutex::new(()),
        }
    }

    /// `iss` of tokens this manager verifies
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Load or generate the key ring (single-flight)
    async fn ring(&self) -> Result<&RwLock<KeyRing>> {
        self.ring
            .get_or_try_init(|| async {
                let key = self.load_or_generate().await?;
                info!(kid = %key.kid(), persisted = self.key_path.is_some(), "Signing key ready");
                Ok(RwLock::new(KeyRing {
                    active: Arc::new(key),
                    retired: Vec::new(),
                }))
            })
            .await
    }

    async fn load_or_generate(&self) -> Result<SigningKey> {
        let Some(path) = &self.key_path else {
            warn!("No oauth.key_path configured; tokens will not survive a restart");
            return SigningKey::generate();
        };

        match tokio::fs::read_to_string(path).await {
            Ok(pem) => {
                debug!(path = %path.display(), "Loading signing key");
                SigningKey::from_pem(&pem)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = SigningKey::generate()?;
                persist_key(path, &key.pem).await?;
                info!(path = %path.display(), kid = %key.kid(), "Generated new signing key");
                Ok(key)
            }
            Err(e) => Err(Error::KeyInitialization(format!(
                "Failed to read signing key {}: {e}",
                path.display()
            ))),
        }
    }

    /// Eagerly initialise the key ring. Fails if key material is unusable.
    pub async fn init(&self) -> Result<()> {
        self.ring().await.map(|_| ())
    }

    /// Current signing key (issuer only)
    pub async fn signing_key(&self) -> Result<Arc<SigningKey>> {
        let ring = self.ring().await?;
        Ok(Arc::clone(&ring.read().active))
    }

    /// Public JWK of the active key
    pub async fn public_jwk(&self) -> Result<Jwk> {
        Ok(self.signing_key().await?.jwk().clone())
    }

    /// JWKS containing the active key and every retained retired key
    pub async fn public_jwks(&self) -> Result<JwkSet> {
        let ring = self.ring().await?;
        let mut guard = ring.write();
        guard.prune(self.retention);
        let keys = std::iter::once(guard.active.jwk().clone())
            .chain(guard.retired.iter().map(|r| r.key.jwk().clone()))
            .collect();
        Ok(JwkSet { keys })
    }

    /// Verify an access token's signature, expiry and issuer.
    ///
    /// The header must name a known `kid`; active and retained keys are
    /// both accepted.
    pub async fn verify(&self, token: &str) -> Result<AccessClaims> {
        let ring = self.ring().await?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::InvalidToken(format!("malformed token: {e}")))?;
        if header.alg != Algorithm::ES256 {
            return Err(Error::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::InvalidToken("missing kid".to_string()))?;
        let key = ring
            .read()
            .find(&kid)
            .ok_or_else(|| Error::InvalidToken(format!("unknown kid {kid}")))?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.leeway = self.leeway.as_secs();
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        jsonwebtoken::decode::<AccessClaims>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::InvalidToken(e.to_string()),
            })
    }

    /// Replace the active key. The previous key stays verifiable until its
    /// tokens have expired.
    ///
    /// Returns the new `kid`.
    pub async fn rotate(&self) -> Result<String> {
        let ring = self.ring().await?;
        let _rotating = self.rotation.lock().await;
        let key = SigningKey::generate()?;
        if let Some(path) = &self.key_path {
            persist_key(path, &key.pem).await?;
        }
        let kid = key.kid().to_string();

        let retired_kid = {
            let mut guard = ring.write();
            let previous = std::mem::replace(&mut guard.active, Arc::new(key));
            let retired_kid = previous.kid().to_string();
            guard.retired.insert(
                0,
                RetiredKey {
                    key: previous,
                    retired_at: Utc::now(),
                },
            );
            guard.prune(self.retention);
            retired_kid
        };

        info!(kid = %kid, retired = %retired_kid, "Rotated signing key");
        audit::emit(&AuditEvent::key_rotated(&kid, Some(&retired_kid)));
        Ok(kid)
    }
}

/// Write the PEM next to `path` and rename it into place, owner-only on Unix
async fn persist_key(path: &Path, pem: &str) -> Result<()> {
    let io_err = |e: std::io::Error| {
        Error::KeyInitialization(format!("Failed to persist signing key {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let tmp = path.with_extension("pem.tmp");
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    {
        use tokio::io::AsyncWriteExt;
        let mut file = options.open(&tmp).await.map_err(io_err)?;
        file.write_all(pem.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
    }
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}
