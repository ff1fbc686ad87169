//! Identity-provider signing keys.
//!
//! Keys are fetched from a JWKS endpoint and kept for as long as the
//! endpoint's `Cache-Control: max-age` allows, falling back to a configured
//! TTL when the header is missing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Google's JWKS endpoint for Firebase ID token signing keys.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Default key TTL in seconds when the endpoint sends no max-age (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Longest time a stale key set may be served while the endpoint is failing (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

/// A JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

struct KeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl KeySet {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    fn is_servable_stale(&self) -> bool {
        self.fetched_at.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS)
    }

    fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(k) => self.keys.get(k).cloned(),
            None => self.keys.values().next().cloned(),
        }
    }
}

/// Thread-safe signing key cache.
pub struct JwksCache {
    jwks_url: String,
    fallback_ttl: Duration,
    allow_stale: bool,
    state: RwLock<Option<KeySet>>,
    client: reqwest::Client,
}

impl JwksCache {
    /// Create a key cache for `jwks_url`. Nothing is fetched until the first lookup.
    pub fn new(
        jwks_url: String,
        fallback_ttl_seconds: u64,
        allow_stale: bool,
    ) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| JwksError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            jwks_url,
            fallback_ttl: Duration::from_secs(fallback_ttl_seconds),
            allow_stale,
            state: RwLock::new(None),
            client,
        })
    }

    /// Endpoint this cache reads from.
    pub fn url(&self) -> &str {
        &self.jwks_url
    }

    /// Get a decoding key by key ID, refreshing the key set when it is stale
    /// or does not know `kid` (keys rotate).
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksError> {
        {
            let state = self.state.read().await;
            if let Some(set) = state.as_ref().filter(|s| s.is_fresh())
                && let Some(key) = set.lookup(kid)
            {
                return Ok(key);
            }
        }

        match self.refresh().await {
            Ok(()) => {
                let state = self.state.read().await;
                state
                    .as_ref()
                    .and_then(|s| s.lookup(kid))
                    .ok_or_else(|| match kid {
                        Some(k) => JwksError::KeyNotFound(k.to_string()),
                        None => JwksError::NoKeysAvailable,
                    })
            }
            Err(e) => {
                if self.allow_stale {
                    let state = self.state.read().await;
                    if let Some(set) = state.as_ref().filter(|s| s.is_servable_stale())
                        && let Some(key) = set.lookup(kid)
                    {
                        warn!(error = %e, "JWKS refresh failed, serving stale keys");
                        return Ok(key);
                    }
                }
                Err(e)
            }
        }
    }

    /// Fetch the key set from the endpoint and replace the cached one.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        debug!(url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let ttl = response
            .headers()
            .get(http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .map(Duration::from_secs)
            .unwrap_or(self.fallback_ttl);

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;

        self.install(document, ttl).await
    }

    /// Replace the cached key set with the keys of `document`.
    pub async fn install(&self, document: JwksDocument, ttl: Duration) -> Result<(), JwksError> {
        let keys = decoding_keys(&document);
        if keys.is_empty() {
            return Err(JwksError::NoValidKeys);
        }

        debug!(count = keys.len(), ttl_secs = ttl.as_secs(), "Cached JWKS keys");
        *self.state.write().await = Some(KeySet {
            keys,
            fetched_at: Instant::now(),
            ttl,
        });
        Ok(())
    }

    /// Number of keys currently held.
    pub async fn key_count(&self) -> usize {
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| s.keys.len())
            .unwrap_or(0)
    }
}

/// RSA signing keys of a document, by kid.
fn decoding_keys(document: &JwksDocument) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();

    for jwk in &document.keys {
        if jwk.kty != "RSA" || jwk.key_use.as_deref() == Some("enc") {
            debug!(kty = %jwk.kty, "Skipping non-signing JWK");
            continue;
        }

        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            warn!(kid = ?jwk.kid, "JWK is missing RSA components");
            continue;
        };

        match DecodingKey::from_rsa_components(n, e) {
            Ok(key) => {
                let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                keys.insert(kid, key);
            }
            Err(err) => warn!(kid = ?jwk.kid, error = %err, "Failed to parse JWK"),
        }
    }

    keys
}

/// Extract `max-age` seconds from a Cache-Control header value.
fn parse_max_age(header: &str) -> Option<u64> {
    header
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|v| v.trim().parse().ok())
}

/// Errors from the signing key cache.
#[derive(Debug, Clone)]
pub enum JwksError {
    /// Failed to reach the JWKS endpoint.
    Fetch(String),
    /// Failed to parse the JWKS response.
    Parse(String),
    /// The document contained no usable signing keys.
    NoValidKeys,
    /// No key with the requested kid.
    KeyNotFound(String),
    /// Key set is empty.
    NoKeysAvailable,
}

impl std::fmt::Display for JwksError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::Parse(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
        }
    }
}

impl std::error::Error for JwksError {}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULUS: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    fn document() -> JwksDocument {
        serde_json::from_value(serde_json::json!({
            "keys": [
                { "kty": "RSA", "kid": "k1", "alg": "RS256", "use": "sig", "n": MODULUS, "e": "AQAB" },
                { "kty": "RSA", "kid": "k2", "use": "enc", "n": MODULUS, "e": "AQAB" },
                { "kty": "EC", "kid": "k3" },
                { "kty": "RSA", "kid": "k4" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(
            parse_max_age("public, max-age=19204, must-revalidate, no-transform"),
            Some(19204)
        );
        assert_eq!(parse_max_age("no-cache"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
    }

    #[test]
    fn test_only_rsa_signing_keys_are_kept() {
        let keys = decoding_keys(&document());
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("k1"));
    }

    #[tokio::test]
    async fn test_installed_keys_are_served_without_fetching() {
        // Unroutable URL: any fetch would fail.
        let cache = JwksCache::new("http://127.0.0.1:9/jwks".to_string(), 3600, false).unwrap();
        cache
            .install(document(), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(cache.key_count().await, 1);
        assert!(cache.get_key(Some("k1")).await.is_ok());
        assert!(cache.get_key(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_install_rejects_document_without_usable_keys() {
        let cache = JwksCache::new(FIREBASE_JWKS_URL.to_string(), 3600, true).unwrap();
        let empty = JwksDocument { keys: Vec::new() };

        let err = cache
            .install(empty, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, JwksError::NoValidKeys));
        assert_eq!(cache.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_keys_served_when_refresh_fails() {
        let cache = JwksCache::new("http://127.0.0.1:9/jwks".to_string(), 3600, true).unwrap();
        cache.install(document(), Duration::ZERO).await.unwrap();

        assert!(cache.get_key(Some("k1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_keys_not_served_when_disallowed() {
        let cache = JwksCache::new("http://127.0.0.1:9/jwks".to_string(), 3600, false).unwrap();
        cache.install(document(), Duration::ZERO).await.unwrap();

        let err = cache.get_key(Some("k1")).await.unwrap_err();
        assert!(matches!(err, JwksError::Fetch(_)));
    }

    #[test]
    fn test_jwks_error_display() {
        assert_eq!(
            JwksError::KeyNotFound("k9".to_string()).to_string(),
            "Key not found: k9"
        );
        assert_eq!(
            JwksError::NoKeysAvailable.to_string(),
            "No keys available in cache"
        );
    }
}
