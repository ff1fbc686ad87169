//! Resolved caller identity.

use serde::{Deserialize, Serialize};

use crate::store::UserRecord;
use crate::types::{AccessToken, SubjectId};

/// Identity bound to a request.
///
/// Built once per request, either from a cache entry or after verification,
/// and immutable afterwards. Its JSON form is what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    subject_id: SubjectId,
    access_token: AccessToken,
    user: UserRecord,
}

impl Identity {
    pub fn new(subject_id: SubjectId, access_token: AccessToken, user: UserRecord) -> Self {
        Self {
            subject_id,
            access_token,
            user,
        }
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    /// Token this identity was verified from.
    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn user(&self) -> &UserRecord {
        &self.user
    }

    /// Serialize for the cache.
    pub fn to_cache_value(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_cache_value(value: &str) -> serde_json::Result<Self> {
        serde_json::from_str(value)
    }
}
