//! OAuth 2.0 client-credentials issuance and verification
//!
//! - [`KeyManager`]: ES256 key ring, JWKS publication, token verification
//! - [`TokenIssuer`]: the `client_credentials` grant
//! - [`ClientRegistry`]: where client ids and secrets come from
//!
//! Access tokens are stateless JWTs. Nothing is persisted except the
//! signing key (when `oauth.key_path` is set).

mod clients;
mod issuer;
mod keys;

pub use clients::{ClientRegistry, RegisteredClient, StaticClientRegistry};
pub use issuer::{CLIENT_CREDENTIALS, ClientCredentials, IssuedToken, TokenIssuer, ip_identity};
pub use keys::{AccessClaims, Jwk, JwkSet, KeyManager, SigningKey};
