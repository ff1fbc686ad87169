//! Identity resolution.
//!
//! Cache-aside over three collaborators: a cache hit for the subject short
//! circuits everything; a miss verifies the token, loads or creates the
//! durable user, and writes the identity back with a TTL that ends when the
//! token does.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::auth::{AuthError, Identity, TokenVerifier};
use crate::cache::{CacheKeyTemplate, EphemeralCache};
use crate::store::UserStore;
use crate::types::{AccessToken, CacheKey, SubjectId};

/// Seconds a cache entry may live for a token expiring at `expires_at`.
///
/// `now` is truncated to the whole second before differencing. A token that
/// is already expired yields `InvalidToken`, never a zero or negative TTL.
pub fn cache_ttl_seconds(expires_at: i64, now: DateTime<Utc>) -> Result<u64, AuthError> {
    let remaining = expires_at - now.timestamp();
    if remaining <= 0 {
        return Err(AuthError::InvalidToken("Token has expired".to_string()));
    }
    Ok(remaining as u64)
}

/// Resolves callers to identities.
pub struct IdentityResolver {
    cache: Arc<dyn EphemeralCache>,
    users: Arc<dyn UserStore>,
    verifier: Arc<dyn TokenVerifier>,
    key_template: CacheKeyTemplate,
}

impl IdentityResolver {
    pub fn new(
        cache: Arc<dyn EphemeralCache>,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn TokenVerifier>,
        key_template: CacheKeyTemplate,
    ) -> Self {
        Self {
            cache,
            users,
            verifier,
            key_template,
        }
    }

    pub fn cache_key(&self, subject_id: &SubjectId) -> CacheKey {
        self.key_template.render(subject_id)
    }

    /// Cached identity for `subject_id`, if any.
    ///
    /// An unreachable cache is an error, not a miss. An entry that cannot be
    /// decoded is treated as a miss and will be overwritten on the next
    /// verification.
    pub async fn resolve_from_cache(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<Identity>, AuthError> {
        let key = self.cache_key(subject_id);
        let Some(value) = self.cache.get(&key).await? else {
            return Ok(None);
        };

        match Identity::from_cache_value(&value) {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Mandatory authentication.
    ///
    /// Returns the cached identity when one exists for `subject_hint` and was
    /// built from this same token. Otherwise verifies the token, checks it
    /// belongs to `subject_hint`, loads or creates the user and caches the
    /// result.
    pub async fn verify_and_resolve(
        &self,
        token: &AccessToken,
        subject_hint: &SubjectId,
    ) -> Result<Identity, AuthError> {
        if let Some(identity) = self.resolve_from_cache(subject_hint).await? {
            if identity.access_token() == token {
                debug!(subject_id = %subject_hint, "Identity cache hit");
                return Ok(identity);
            }
            debug!(subject_id = %subject_hint, "Cached identity is for another token");
        }

        self.verify_uncached(token, subject_hint).await
    }

    async fn verify_uncached(
        &self,
        token: &AccessToken,
        subject_hint: &SubjectId,
    ) -> Result<Identity, AuthError> {
        let claims = self.verifier.verify(token).await?;

        if &claims.subject_id != subject_hint {
            warn!(
                subject_id = %subject_hint,
                token_subject = %claims.subject_id,
                "Token presented for another subject"
            );
            return Err(AuthError::SubjectMismatch);
        }

        let ttl_seconds = cache_ttl_seconds(claims.expires_at, Utc::now())?;

        let user = self.users.find_or_create(&claims.subject_id).await?;
        let identity = Identity::new(claims.subject_id, token.clone(), user);

        self.write_through(&identity, ttl_seconds).await;

        Ok(identity)
    }

    /// Best-effort cache population; failures are logged only.
    async fn write_through(&self, identity: &Identity, ttl_seconds: u64) {
        let key = self.cache_key(identity.subject_id());

        let value = match identity.to_cache_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize identity for cache");
                return;
            }
        };

        match self.cache.set(&key, value, ttl_seconds).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl_seconds, "Identity cached"),
            Err(e) => warn!(key = %key, error = %e, "Identity cache write failed"),
        }
    }

    /// Advisory authentication: cache lookup only, never verification.
    ///
    /// Without a subject hint nothing is contacted and `None` is returned.
    pub async fn resolve(
        &self,
        subject_hint: Option<&SubjectId>,
    ) -> Result<Option<Identity>, AuthError> {
        match subject_hint {
            Some(subject_id) => self.resolve_from_cache(subject_id).await,
            None => Ok(None),
        }
    }
}
