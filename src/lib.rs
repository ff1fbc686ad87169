//! Bearer-token identity resolution with a cache in front of verification.
//!
//! A request carries a token and the subject it claims to act as. The
//! [`IdentityResolver`] answers from the ephemeral cache when it can; on a
//! miss it verifies the token, checks the subject, loads or creates the
//! durable user and caches the identity until the token expires.

pub mod auth;
pub mod cache;
pub mod config;
pub mod middleware;
pub mod resolver;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth::{AuthError, Identity, JwtVerifier, TokenVerifier, VerifiedClaims};
pub use cache::{CacheKeyTemplate, EphemeralCache, MemoryCache, RedisCache};
pub use config::{GateConfig, VerifierMode, load_config, resolve_config_path};
pub use middleware::{AuthOutcome, AuthState, CredentialSource};
pub use resolver::{IdentityResolver, cache_ttl_seconds};
pub use store::{DatabaseConfig, SurrealUserStore, UserFieldMap, UserRecord, UserStore};
pub use types::{AccessToken, SubjectId};

use std::sync::Arc;

use anyhow::Result;
use jsonwebtoken::{Algorithm, DecodingKey};
use tracing::info;

use auth::JwksCache;
use config::{CacheConfig, VerifierConfig};

/// Build the token verifier selected by `config`.
pub fn build_verifier(config: &VerifierConfig) -> Result<Arc<dyn TokenVerifier>> {
    let verifier = match config.mode()? {
        VerifierMode::Firebase {
            project_id,
            jwks_url,
        } => {
            let jwks = JwksCache::new(
                jwks_url,
                config.jwks_cache_seconds,
                config.allow_stale_jwks,
            )?;
            info!(project_id = %project_id, "Verifying Firebase ID tokens");
            JwtVerifier::firebase(&project_id, Arc::new(jwks))
        }
        VerifierMode::Jwks { jwks_url } => {
            let jwks = JwksCache::new(
                jwks_url,
                config.jwks_cache_seconds,
                config.allow_stale_jwks,
            )?;
            info!(jwks_url = %jwks.url(), "Verifying RS256 tokens against JWKS");
            JwtVerifier::with_jwks(
                Arc::new(jwks),
                config.issuer.clone(),
                config.audience.clone(),
            )
        }
        VerifierMode::SharedSecret { secret } => {
            info!("Verifying HS256 tokens with a shared secret");
            JwtVerifier::with_static_key(
                DecodingKey::from_secret(secret.as_bytes()),
                Algorithm::HS256,
                config.issuer.clone(),
                config.audience.clone(),
            )
        }
    };

    Ok(Arc::new(verifier))
}

/// Build the ephemeral cache. Redis is not contacted until first use.
pub fn build_cache(config: &CacheConfig) -> Result<Arc<dyn EphemeralCache>> {
    if config.url == "memory" {
        info!("Using in-process identity cache");
        return Ok(Arc::new(MemoryCache::new()));
    }

    Ok(Arc::new(RedisCache::open(&config.url)?))
}

/// Connect every collaborator and assemble the resolver.
pub async fn build_resolver(config: &GateConfig) -> Result<Arc<IdentityResolver>> {
    config.validate()?;

    let verifier = build_verifier(&config.verifier)?;
    let cache = build_cache(&config.cache)?;

    let db = store::create_connection(config.database.clone()).await?;
    let users = SurrealUserStore::new(db, config.users.clone())?;
    users.ensure_schema().await?;

    Ok(Arc::new(IdentityResolver::new(
        cache,
        Arc::new(users),
        verifier,
        config.cache.store_key.clone(),
    )))
}
