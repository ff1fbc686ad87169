//! Ephemeral identity cache.
//!
//! A key-value store with per-key TTL holding serialized identities. Keys
//! are rendered from a configured template so deployments sharing one Redis
//! can namespace their entries.

mod memory;
mod redis_cache;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::types::{BoxFuture, CacheKey, SubjectId};

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

/// Default cache key template.
pub const DEFAULT_KEY_TEMPLATE: &str = "auth:user:{subject_id}";

const PLACEHOLDER: &str = "{subject_id}";
const LEGACY_PLACEHOLDER: &str = "%(fid)s";

/// Key-value store with per-key expiry.
pub trait EphemeralCache: Send + Sync {
    /// Value stored under `key`, or `None` if absent or expired.
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<String>, AuthError>>;

    /// Store `value` under `key` for `ttl_seconds` (must be positive).
    fn set<'a>(
        &'a self,
        key: &'a CacheKey,
        value: String,
        ttl_seconds: u64,
    ) -> BoxFuture<'a, Result<(), AuthError>>;
}

/// Template rendering a subject id into a cache key.
///
/// The placeholder is `{subject_id}`; the sprintf-style `%(fid)s` is
/// accepted as well and normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKeyTemplate(String);

impl CacheKeyTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let normalized = template.replace(LEGACY_PLACEHOLDER, PLACEHOLDER);
        if !normalized.contains(PLACEHOLDER) {
            bail!(
                "cache key template `{}` has no {} placeholder",
                template,
                PLACEHOLDER
            );
        }
        Ok(Self(normalized))
    }

    /// Render the key for `subject_id`. Same subject, same key.
    pub fn render(&self, subject_id: &SubjectId) -> CacheKey {
        CacheKey::new(self.0.replace(PLACEHOLDER, subject_id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CacheKeyTemplate {
    fn default() -> Self {
        Self(DEFAULT_KEY_TEMPLATE.to_string())
    }
}

impl TryFrom<String> for CacheKeyTemplate {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CacheKeyTemplate> for String {
    fn from(t: CacheKeyTemplate) -> Self {
        t.0
    }
}
