//! Shared fixtures for tests that need a working resolver.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};

use crate::auth::{AuthError, JwtVerifier};
use crate::cache::{CacheKeyTemplate, EphemeralCache, MemoryCache};
use crate::resolver::IdentityResolver;
use crate::store::{DatabaseConfig, SurrealUserStore, UserFieldMap, create_connection};
use crate::types::{AccessToken, BoxFuture, CacheKey};

pub const SECRET: &[u8] = b"integration-secret";
pub const PROJECT: &str = "gate-test";

/// Resolver over an in-memory cache, an in-memory SurrealDB and an HS256 verifier.
pub async fn memory_resolver() -> (Arc<IdentityResolver>, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    (resolver_with_cache(cache.clone()).await, cache)
}

/// Resolver over `cache`, an in-memory SurrealDB and an HS256 verifier.
pub async fn resolver_with_cache(cache: Arc<dyn EphemeralCache>) -> Arc<IdentityResolver> {
    let db = create_connection(DatabaseConfig {
        url: "memory".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();
    let store = SurrealUserStore::new(db, UserFieldMap::default()).unwrap();
    store.ensure_schema().await.unwrap();

    let verifier = JwtVerifier::with_static_key(
        DecodingKey::from_secret(SECRET),
        Algorithm::HS256,
        None,
        Some(PROJECT.to_string()),
    );

    Arc::new(IdentityResolver::new(
        cache,
        Arc::new(store),
        Arc::new(verifier),
        CacheKeyTemplate::default(),
    ))
}

fn connection_refused() -> AuthError {
    AuthError::CacheUnavailable("connection refused".to_string())
}

/// Cache whose every call fails as if the server were down.
pub struct UnreachableCache;

impl EphemeralCache for UnreachableCache {
    fn get<'a>(&'a self, _key: &'a CacheKey) -> BoxFuture<'a, Result<Option<String>, AuthError>> {
        Box::pin(async { Err(connection_refused()) })
    }

    fn set<'a>(
        &'a self,
        _key: &'a CacheKey,
        _value: String,
        _ttl_seconds: u64,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async { Err(connection_refused()) })
    }
}

/// HS256 token for `subject` expiring `expires_in` seconds from now.
pub fn sign_token(subject: &str, expires_in: i64) -> AccessToken {
    let now = Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": subject,
        "aud": PROJECT,
        "iat": now,
        "exp": now + expires_in,
    });

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap();
    AccessToken::new(token)
}
