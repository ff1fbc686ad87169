//! SurrealDB-backed user store.

use std::env;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use tracing::error;

use crate::store::record::{UserFieldMap, UserRecord};
use crate::store::{NewUser, StoreError, UserStore};
use crate::types::{BoxFuture, SubjectId};

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("IDENTITY_GATE_DB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("IDENTITY_GATE_DB_NAMESPACE")
                .unwrap_or_else(|_| "identity".to_string()),
            database: env::var("IDENTITY_GATE_DB_DATABASE")
                .unwrap_or_else(|_| "gate".to_string()),
            username: env::var("IDENTITY_GATE_DB_USERNAME").ok(),
            password: env::var("IDENTITY_GATE_DB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// User store for a SurrealDB table.
pub struct SurrealUserStore {
    db: Db,
    fields: UserFieldMap,
}

impl SurrealUserStore {
    /// Create a store over `fields.table`. Field names are validated here.
    pub fn new(db: Db, fields: UserFieldMap) -> Result<Self> {
        fields.validate()?;
        Ok(Self { db, fields })
    }

    /// Define the user table and the unique index on the subject path.
    pub async fn ensure_schema(&self) -> Result<()> {
        let table = &self.fields.table;
        let query = format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS {table}_subject ON TABLE {table} FIELDS {path} UNIQUE;",
            table = table,
            path = self.fields.subject_path(),
        );

        self.db.query(query).await?.check()?;
        Ok(())
    }

    fn select_by_subject(&self) -> String {
        format!(
            "SELECT *, type::string(id) AS id FROM type::table($table) WHERE {} = $subject_id LIMIT 1",
            self.fields.subject_path()
        )
    }

    fn into_record(&self, rows: Vec<Value>) -> Result<Option<UserRecord>, StoreError> {
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let document = match row {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Backend(format!(
                    "unexpected user row: {}",
                    other
                )));
            }
        };

        self.fields
            .to_record(document)
            .map(Some)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find(&self, subject_id: &SubjectId) -> Result<Option<UserRecord>, StoreError> {
        let mut res = self
            .db
            .query(self.select_by_subject())
            .bind(("table", self.fields.table.clone()))
            .bind(("subject_id", subject_id.as_str().to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<Value> = res.take(0).map_err(backend)?;
        self.into_record(rows)
    }

    async fn insert(&self, user: &NewUser) -> Result<UserRecord, StoreError> {
        let mut linkage = Map::new();
        linkage.insert(
            self.fields.subject_field.clone(),
            Value::String(user.subject_id.as_str().to_string()),
        );

        let mut content = Map::new();
        content.insert(self.fields.linkage_field.clone(), Value::Object(linkage));
        content.insert(
            self.fields.created_at_field.clone(),
            Value::String(user.created_at.to_rfc3339()),
        );

        let query = format!(
            "CREATE type::table($table) CONTENT $content RETURN NONE; {};",
            self.select_by_subject()
        );

        let res = self
            .db
            .query(query)
            .bind(("table", self.fields.table.clone()))
            .bind(("content", Value::Object(content)))
            .bind(("subject_id", user.subject_id.as_str().to_string()))
            .await
            .map_err(backend)?;

        let mut res = res.check().map_err(|e| {
            if is_conflict(&e) {
                StoreError::Conflict
            } else {
                backend(e)
            }
        })?;

        let rows: Vec<Value> = res.take(1).map_err(backend)?;
        self.into_record(rows)?.ok_or_else(|| {
            StoreError::Backend(format!("user for {} missing after create", user.subject_id))
        })
    }
}

impl UserStore for SurrealUserStore {
    fn find_by_subject<'a>(
        &'a self,
        subject_id: &'a SubjectId,
    ) -> BoxFuture<'a, Result<Option<UserRecord>, StoreError>> {
        Box::pin(self.find(subject_id))
    }

    fn create<'a>(&'a self, user: &'a NewUser) -> BoxFuture<'a, Result<UserRecord, StoreError>> {
        Box::pin(self.insert(user))
    }
}

/// Unique-index violations and optimistic transaction conflicts both mean
/// another writer created the record first.
fn is_conflict(e: &surrealdb::Error) -> bool {
    let msg = e.to_string();
    msg.contains("already contains") || msg.contains("conflict")
}

fn backend(e: surrealdb::Error) -> StoreError {
    error!(error = %e, "User store query failed");
    StoreError::Backend(e.to_string())
}
