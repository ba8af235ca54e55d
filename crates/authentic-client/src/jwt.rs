//! Token verification.
//!
//! Tokens issued by the auth server are RS256 JWTs. Verification checks the
//! structure first (so garbage never costs a key fetch), then pins the
//! algorithm to RS256, then checks signature and expiry against the key from
//! the [`KeyCache`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TokenError;
use crate::keys::{KeyCache, PublicKey};

/// Claims carried by a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity the token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issue time, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Any other claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// When the token expires.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Trait for verifying tokens.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is absent, malformed, expired, signed
    /// with the wrong key or algorithm, or if no key is available.
    async fn verify(&self, token: Option<&str>) -> Result<Claims, TokenError>;
}

/// Verifies RS256 tokens against the auth server's public key.
#[derive(Debug, Clone)]
pub struct RsaTokenVerifier {
    keys: Arc<KeyCache>,
}

impl RsaTokenVerifier {
    /// Create a verifier backed by the given key cache.
    #[must_use]
    pub const fn new(keys: Arc<KeyCache>) -> Self {
        Self { keys }
    }

    /// The key cache this verifier reads from.
    #[must_use]
    pub fn keys(&self) -> &KeyCache {
        &self.keys
    }
}

#[async_trait]
impl TokenVerifier for RsaTokenVerifier {
    async fn verify(&self, token: Option<&str>) -> Result<Claims, TokenError> {
        let token = token
            .filter(|token| !token.is_empty())
            .ok_or(TokenError::MissingToken)?;

        check_structure(token)?;

        let key = self.keys.get().await?;
        let result = verify_with_key(token, &key);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "Token failed verification");
        }
        result
    }
}

/// Structural and algorithm checks that need no key.
///
/// A token must have three segments, a decodable header, and a payload that
/// is base64url-encoded JSON before a key is fetched for it.
fn check_structure(token: &str) -> Result<(), TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };

    let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload: {e}")))?;
    let payload: Value = serde_json::from_slice(&payload)
        .map_err(|e| TokenError::Malformed(format!("payload: {e}")))?;
    if !payload.is_object() {
        return Err(TokenError::Malformed("payload is not a JSON object".to_string()));
    }

    if header.alg != Algorithm::RS256 {
        return Err(TokenError::AlgorithmMismatch(format!("{:?}", header.alg)));
    }
    Ok(())
}

/// Verify signature and expiry with a known key.
///
/// # Errors
///
/// Returns the reason the token was rejected.
pub fn verify_with_key(token: &str, key: &PublicKey) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 0;
    validation.validate_aud = false;

    decode::<Claims>(token, key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidAlgorithm => TokenError::AlgorithmMismatch(e.to_string()),
            _ => TokenError::Malformed(e.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/rsa-private.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/rsa-public.pem");
    const OTHER_PRIVATE_KEY: &str = include_str!("../tests/fixtures/other-private.pem");

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            email: Some("chet@scalehaus.io".to_string()),
            exp: now + exp_offset,
            iat: Some(now),
            extra: Map::new(),
        }
    }

    fn sign(private_pem: &str, claims: &Claims) -> String {
        let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
    }

    fn public_key() -> PublicKey {
        PublicKey::from_pem(PUBLIC_KEY).unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let expected = claims(3600);
        let token = sign(PRIVATE_KEY, &expected);

        let claims = verify_with_key(&token, &public_key()).unwrap();
        assert_eq!(claims, expected);
        assert_eq!(claims.expires_at().unwrap().timestamp(), expected.exp);
    }

    #[test]
    fn expired_token_is_never_valid() {
        for offset in [-1, -60, -86_400] {
            let token = sign(PRIVATE_KEY, &claims(offset));
            assert_eq!(
                verify_with_key(&token, &public_key()),
                Err(TokenError::Expired)
            );
        }
    }

    #[test]
    fn wrong_key_is_invalid_signature() {
        let token = sign(OTHER_PRIVATE_KEY, &claims(3600));
        assert_eq!(
            verify_with_key(&token, &public_key()),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn structure_rejects_garbage() {
        assert!(matches!(check_structure("1234"), Err(TokenError::Malformed(_))));
        assert!(matches!(check_structure("a.b.c"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn structure_rejects_bad_payload() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let cases = [
            // not JSON
            format!("{header}.{}.c2ln", URL_SAFE_NO_PAD.encode("not json")),
            // JSON, but not an object
            format!("{header}.{}.c2ln", URL_SAFE_NO_PAD.encode("[1,2]")),
            // not base64url
            format!("{header}.!!!.c2ln"),
            // extra segment
            format!("{header}.{}.c2ln.extra", URL_SAFE_NO_PAD.encode("{}")),
        ];
        for token in cases {
            assert!(
                matches!(check_structure(&token), Err(TokenError::Malformed(_))),
                "accepted {token}"
            );
        }
    }

    #[test]
    fn header_rejects_hmac_downgrade() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(3600),
            &EncodingKey::from_secret(PUBLIC_KEY.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            check_structure(&token),
            Err(TokenError::AlgorithmMismatch(_))
        ));
    }

    #[test]
    fn structure_accepts_rs256() {
        let token = sign(PRIVATE_KEY, &claims(3600));
        assert!(check_structure(&token).is_ok());
    }

    #[test]
    fn token_without_expiry_is_malformed() {
        #[derive(Serialize)]
        struct NoExp {
            email: &'static str,
        }

        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        let token = encode(
            &Header::new(Algorithm::RS256),
            &NoExp {
                email: "a@b.com",
            },
            &key,
        )
        .unwrap();

        assert!(matches!(
            verify_with_key(&token, &public_key()),
            Err(TokenError::Malformed(_))
        ));
    }
}
