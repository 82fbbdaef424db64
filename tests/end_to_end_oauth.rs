//! Issue → publish → verify, from the outside in
//!
//! Tokens are checked both by the server's own verifier and by a plain
//! `jsonwebtoken` decoder fed only with the published JWKS, the way a
//! downstream service would.

mod common;

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{Method, StatusCode};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use pretty_assertions::assert_eq;

use common::{CLIENT_ID, Harness, access_token, get, request};
use feed_warden::Error;
use feed_warden::oauth::{AccessClaims, JwkSet};

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

async fn published_jwks(harness: &Harness) -> JwkSet {
    let response = harness.send(get("/oauth/jwks")).await;
    assert_eq!(response.status, StatusCode::OK);
    serde_json::from_value(response.body).unwrap()
}

/// Verify `token` using nothing but the JWKS document
fn verify_with_jwks(jwks: &JwkSet, token: &str) -> jsonwebtoken::errors::Result<AccessClaims> {
    let header = decode_header(token)?;
    let kid = header.kid.unwrap_or_default();
    let jwk = jwks
        .find(&kid)
        .ok_or(jsonwebtoken::errors::ErrorKind::InvalidKeyFormat)?;
    let key = DecodingKey::from_ec_components(&jwk.x, &jwk.y)?;
    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_issuer(&["feed-warden"]);
    decode::<AccessClaims>(token, &key, &validation).map(|data| data.claims)
}

#[tokio::test]
async fn issued_token_verifies_against_published_key() {
    // GIVEN: a token from the token endpoint
    let harness = Harness::new();
    let token = access_token(&harness).await;

    // WHEN: its kid is looked up in the JWKS
    let header = decode_header(&token).unwrap();
    let jwks = published_jwks(&harness).await;

    // THEN: the kid is published and both verifiers accept the token
    assert_eq!(header.alg, Algorithm::ES256);
    let kid = header.kid.unwrap();
    assert!(jwks.find(&kid).is_some());

    let external = verify_with_jwks(&jwks, &token).unwrap();
    let internal = harness.state.keys.verify(&token).await.unwrap();
    assert_eq!(external, internal);
    assert_eq!(internal.sub, CLIENT_ID);
    assert_eq!(internal.iss, "feed-warden");
    assert!(internal.has_scope("admin"));
    assert_eq!(internal.exp - internal.iat, 600);
}

#[tokio::test]
async fn expired_token_is_rejected_everywhere() {
    // GIVEN: a token signed by the active key but expired well past leeway
    let harness = Harness::new();
    let key = harness.state.keys.signing_key().await.unwrap();
    let issued_at = now() - 3600;
    let claims = AccessClaims {
        iss: "feed-warden".to_string(),
        sub: CLIENT_ID.to_string(),
        iat: issued_at,
        exp: issued_at + 600,
        jti: "expired-1".to_string(),
        scope: Some("admin".to_string()),
    };
    let token = key.sign(&claims).unwrap();

    // WHEN / THEN: the verifier reports expiry
    let err = harness.state.keys.verify(&token).await.unwrap_err();
    assert!(matches!(err, Error::TokenExpired), "{err:?}");

    // ...an external verifier agrees
    let jwks = published_jwks(&harness).await;
    assert!(verify_with_jwks(&jwks, &token).is_err());

    // ...and the admin API refuses it
    let response = harness
        .send(request(Method::GET, "/admin/cache", Some(&token)))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "invalid_token");
}

#[tokio::test]
async fn tampered_token_is_rejected() {
    let harness = Harness::new();
    let token = access_token(&harness).await;

    // Swap the payload for one naming another client
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    let forged_claims = serde_json::json!({
        "iss": "feed-warden",
        "sub": "intruder",
        "iat": now(),
        "exp": now() + 600,
        "jti": "forged",
    });
    parts[1] = base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        forged_claims.to_string(),
    );
    let forged = parts.join(".");

    let err = harness.state.keys.verify(&forged).await.unwrap_err();
    assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
}

#[tokio::test]
async fn tokens_survive_rotation() {
    // GIVEN: a token signed before rotation
    let harness = Harness::new();
    let before = access_token(&harness).await;
    let old_kid = decode_header(&before).unwrap().kid.unwrap();

    // WHEN: the key is rotated and a new token issued
    let new_kid = harness.state.keys.rotate().await.unwrap();
    harness.state.limits.oauth.reset();
    let after = access_token(&harness).await;

    // THEN: both verify and both kids are published
    assert_ne!(old_kid, new_kid);
    assert_eq!(decode_header(&after).unwrap().kid.unwrap(), new_kid);
    assert!(harness.state.keys.verify(&before).await.is_ok());
    assert!(harness.state.keys.verify(&after).await.is_ok());

    let jwks = harness.state.keys.public_jwks().await.unwrap();
    assert!(jwks.find(&old_kid).is_some());
    assert!(jwks.find(&new_kid).is_some());
    assert!(verify_with_jwks(&jwks, &before).is_ok());
}
