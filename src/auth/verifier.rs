//! Bearer token verification.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::jwks::{JwksCache, JwksError};
use crate::types::{AccessToken, BoxFuture, SubjectId};

/// Longest subject id Firebase issues.
pub const MAX_SUBJECT_LEN: usize = 128;

/// Claims the resolver needs from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub subject_id: SubjectId,
    /// Expiry as Unix seconds
    pub expires_at: i64,
}

/// Verifies a raw bearer token and returns its claims.
pub trait TokenVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        token: &'a AccessToken,
    ) -> BoxFuture<'a, Result<VerifiedClaims, AuthError>>;
}

/// Raw JWT claims.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    exp: i64,
    iat: Option<i64>,
    auth_time: Option<i64>,
}

enum KeySource {
    Jwks(Arc<JwksCache>),
    Static(DecodingKey),
}

/// JWT verifier backed by a JWKS endpoint or a fixed key.
pub struct JwtVerifier {
    keys: KeySource,
    validation: Validation,
}

impl JwtVerifier {
    /// Verifier for Firebase ID tokens of `project_id`.
    pub fn firebase(project_id: &str, jwks: Arc<JwksCache>) -> Self {
        Self::with_jwks(
            jwks,
            Some(format!("https://securetoken.google.com/{}", project_id)),
            Some(project_id.to_string()),
        )
    }

    /// RS256 verifier using keys from a JWKS endpoint.
    pub fn with_jwks(
        jwks: Arc<JwksCache>,
        issuer: Option<String>,
        audience: Option<String>,
    ) -> Self {
        Self {
            keys: KeySource::Jwks(jwks),
            validation: validation(Algorithm::RS256, issuer, audience),
        }
    }

    /// Verifier using a single fixed key, e.g. an HS256 shared secret.
    pub fn with_static_key(
        key: DecodingKey,
        algorithm: Algorithm,
        issuer: Option<String>,
        audience: Option<String>,
    ) -> Self {
        Self {
            keys: KeySource::Static(key),
            validation: validation(algorithm, issuer, audience),
        }
    }

    async fn decoding_key(&self, token: &str) -> Result<DecodingKey, AuthError> {
        match &self.keys {
            KeySource::Static(key) => Ok(key.clone()),
            KeySource::Jwks(cache) => {
                let header = decode_header(token)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid JWT header: {}", e)))?;

                cache.get_key(header.kid.as_deref()).await.map_err(|e| match e {
                    JwksError::KeyNotFound(kid) => {
                        AuthError::InvalidToken(format!("Unknown signing key: {}", kid))
                    }
                    other => AuthError::VerifierUnavailable(other.to_string()),
                })
            }
        }
    }

    async fn verify_token(&self, token: &AccessToken) -> Result<VerifiedClaims, AuthError> {
        let key = self.decoding_key(token.as_str()).await?;

        let data = decode::<IdTokenClaims>(token.as_str(), &key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        if claims.sub.is_empty() || claims.sub.len() > MAX_SUBJECT_LEN {
            return Err(AuthError::InvalidToken(
                "Subject must be a non-empty string of at most 128 characters".to_string(),
            ));
        }

        let latest = Utc::now().timestamp() + self.validation.leeway as i64;
        if claims.iat.is_some_and(|iat| iat > latest) {
            return Err(AuthError::InvalidToken("Token issued in the future".to_string()));
        }
        if claims.auth_time.is_some_and(|t| t > latest) {
            return Err(AuthError::InvalidToken(
                "Authentication time is in the future".to_string(),
            ));
        }

        debug!(subject_id = %claims.sub, "Token verified");

        Ok(VerifiedClaims {
            subject_id: SubjectId::new(claims.sub),
            expires_at: claims.exp,
        })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify<'a>(
        &'a self,
        token: &'a AccessToken,
    ) -> BoxFuture<'a, Result<VerifiedClaims, AuthError>> {
        Box::pin(self.verify_token(token))
    }
}

fn validation(
    algorithm: Algorithm,
    issuer: Option<String>,
    audience: Option<String>,
) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.set_required_spec_claims(&["exp", "sub"]);

    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    match audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &[u8] = b"test-secret";
    const PROJECT: &str = "demo-project";

    fn issuer() -> String {
        format!("https://securetoken.google.com/{}", PROJECT)
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::with_static_key(
            DecodingKey::from_secret(SECRET),
            Algorithm::HS256,
            Some(issuer()),
            Some(PROJECT.to_string()),
        )
    }

    fn sign(claims: serde_json::Value) -> AccessToken {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        AccessToken::new(token)
    }

    fn claims(sub: &str, exp_offset: i64) -> serde_json::Value {
        let now = Utc::now().timestamp();
        serde_json::json!({
            "sub": sub,
            "exp": now + exp_offset,
            "iat": now - 10,
            "auth_time": now - 10,
            "iss": issuer(),
            "aud": PROJECT,
        })
    }

    #[tokio::test]
    async fn test_valid_token_yields_claims() {
        let token = sign(claims("abc", 300));
        let verified = verifier().verify(&token).await.unwrap();

        assert_eq!(verified.subject_id.as_str(), "abc");
        assert!(verified.expires_at > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_wrong_signature_is_invalid() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims("abc", 300),
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        let err = verifier().verify(&AccessToken::new(token)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let token = sign(claims("abc", -3600));
        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_wrong_audience_is_invalid() {
        let mut c = claims("abc", 300);
        c["aud"] = serde_json::json!("another-project");

        let err = verifier().verify(&sign(c)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_wrong_issuer_is_invalid() {
        let mut c = claims("abc", 300);
        c["iss"] = serde_json::json!("https://evil.example.com");

        let err = verifier().verify(&sign(c)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_subject_length_is_enforced() {
        let err = verifier().verify(&sign(claims("", 300))).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));

        let long = "x".repeat(MAX_SUBJECT_LEN + 1);
        let err = verifier().verify(&sign(claims(&long, 300))).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_future_issued_at_is_invalid() {
        let mut c = claims("abc", 7200);
        c["iat"] = serde_json::json!(Utc::now().timestamp() + 3600);

        let err = verifier().verify(&sign(c)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let err = verifier()
            .verify(&AccessToken::new("not-a-jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_unreachable_jwks_is_verifier_unavailable() {
        let jwks = Arc::new(
            JwksCache::new("http://127.0.0.1:9/jwks".to_string(), 3600, true).unwrap(),
        );
        let verifier = JwtVerifier::firebase(PROJECT, jwks);

        // RS256 header with a kid; the signature never gets checked.
        let token = AccessToken::new(
            "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIiwidHlwIjoiSldUIn0.eyJzdWIiOiJhYmMifQ.c2ln",
        );
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::VerifierUnavailable(_)));
    }
}
