//! Durable user record and its field mapping.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::SubjectId;

/// Persisted user, created the first time a subject is seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Store-assigned identifier (e.g. "user:9x2k...")
    pub id: String,
    /// Provider subject this record is linked to
    pub subject_id: SubjectId,
    pub created_at: DateTime<Utc>,
    /// Remaining domain fields of the stored document
    #[serde(default, flatten)]
    pub fields: Map<String, Value>,
}

/// Names of the table and fields the user document lives under.
///
/// The stored shape is
/// `{ <linkage_field>: { <subject_field>: "<sid>" }, <created_at_field>: "<rfc3339>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFieldMap {
    pub table: String,
    pub linkage_field: String,
    pub subject_field: String,
    pub created_at_field: String,
}

impl Default for UserFieldMap {
    fn default() -> Self {
        Self {
            table: "user".to_string(),
            linkage_field: "auth_firebase".to_string(),
            subject_field: "fid".to_string(),
            created_at_field: "created_at".to_string(),
        }
    }
}

impl UserFieldMap {
    /// Reject names that are not plain identifiers, since they are spliced into queries.
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("table", &self.table),
            ("linkage_field", &self.linkage_field),
            ("subject_field", &self.subject_field),
            ("created_at_field", &self.created_at_field),
        ] {
            if !is_identifier(name) {
                bail!("users.{} `{}` is not a valid identifier", what, name);
            }
        }

        if self.linkage_field == self.created_at_field {
            bail!("users.linkage_field and users.created_at_field must differ");
        }

        Ok(())
    }

    /// Dotted path to the subject id inside the document.
    pub fn subject_path(&self) -> String {
        format!("{}.{}", self.linkage_field, self.subject_field)
    }

    /// Build a `UserRecord` from a stored document.
    ///
    /// `id` must already be rendered as a string.
    pub fn to_record(&self, mut document: Map<String, Value>) -> Result<UserRecord> {
        let id = match document.remove("id") {
            Some(Value::String(id)) => id,
            other => bail!("user document has no string id: {:?}", other),
        };

        let subject_id = document
            .get(&self.linkage_field)
            .and_then(|link| link.get(&self.subject_field))
            .and_then(Value::as_str)
            .map(SubjectId::new);
        let Some(subject_id) = subject_id else {
            bail!("user document {} has no {}", id, self.subject_path());
        };
        document.remove(&self.linkage_field);

        let created_at = match document.remove(&self.created_at_field) {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc),
            other => bail!(
                "user document {} has no {}: {:?}",
                id,
                self.created_at_field,
                other
            ),
        };

        Ok(UserRecord {
            id,
            subject_id,
            created_at,
            fields: document,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping_is_valid() {
        let map = UserFieldMap::default();
        assert!(map.validate().is_ok());
        assert_eq!(map.subject_path(), "auth_firebase.fid");
    }

    #[test]
    fn test_injection_in_field_names_is_rejected() {
        let map = UserFieldMap {
            table: "user; REMOVE TABLE user".to_string(),
            ..Default::default()
        };
        assert!(map.validate().is_err());

        let map = UserFieldMap {
            subject_field: "1fid".to_string(),
            ..Default::default()
        };
        assert!(map.validate().is_err());
    }

    #[test]
    fn test_to_record_splits_domain_fields() {
        let map = UserFieldMap::default();
        let document = serde_json::json!({
            "id": "user:k1",
            "auth_firebase": { "fid": "abc" },
            "created_at": "2024-05-01T10:00:00Z",
            "nickname": "ace"
        });

        let record = map
            .to_record(document.as_object().unwrap().clone())
            .unwrap();
        assert_eq!(record.id, "user:k1");
        assert_eq!(record.subject_id.as_str(), "abc");
        assert_eq!(record.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.fields["nickname"], "ace");
    }

    #[test]
    fn test_to_record_requires_linkage() {
        let map = UserFieldMap::default();
        let document = serde_json::json!({
            "id": "user:k1",
            "created_at": "2024-05-01T10:00:00Z"
        });

        assert!(map.to_record(document.as_object().unwrap().clone()).is_err());
    }
}
