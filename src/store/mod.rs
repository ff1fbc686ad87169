//! Durable user store.
//!
//! Users are keyed by provider subject id and created on first sight. The
//! store enforces one record per subject with a unique index; a create that
//! loses a race against a concurrent request falls back to reading the
//! winner's record.

mod record;
mod surreal;

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::auth::AuthError;
use crate::types::{BoxFuture, SubjectId};

pub use record::{UserFieldMap, UserRecord};
pub use surreal::{DatabaseConfig, Db, SurrealUserStore, create_connection};

/// Payload for creating a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub subject_id: SubjectId,
    pub created_at: DateTime<Utc>,
}

/// Persistent users keyed by provider subject id.
pub trait UserStore: Send + Sync {
    /// Load the user linked to `subject_id`, if any.
    fn find_by_subject<'a>(
        &'a self,
        subject_id: &'a SubjectId,
    ) -> BoxFuture<'a, Result<Option<UserRecord>, StoreError>>;

    /// Insert a new user. Returns `StoreError::Conflict` if one already
    /// exists for the subject.
    fn create<'a>(&'a self, user: &'a NewUser) -> BoxFuture<'a, Result<UserRecord, StoreError>>;

    /// Get or create the user linked to `subject_id`.
    fn find_or_create<'a>(
        &'a self,
        subject_id: &'a SubjectId,
    ) -> BoxFuture<'a, Result<UserRecord, StoreError>> {
        Box::pin(async move {
            if let Some(user) = self.find_by_subject(subject_id).await? {
                return Ok(user);
            }

            let new_user = NewUser {
                subject_id: subject_id.clone(),
                created_at: Utc::now(),
            };

            match self.create(&new_user).await {
                Ok(user) => {
                    info!(
                        subject_id = %subject_id,
                        user_id = %user.id,
                        "Created user on first sight"
                    );
                    Ok(user)
                }
                Err(StoreError::Conflict) => {
                    debug!(subject_id = %subject_id, "Lost user creation race, reloading");
                    self.find_by_subject(subject_id).await?.ok_or_else(|| {
                        StoreError::Backend(format!(
                            "user for {} conflicted on create but cannot be found",
                            subject_id
                        ))
                    })
                }
                Err(e) => Err(e),
            }
        })
    }
}

/// Durable store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A user for the subject already exists
    Conflict,
    /// Query or insert failed
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "User already exists for subject"),
            Self::Backend(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::DurableStore(e.to_string())
    }
}
