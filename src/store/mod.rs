// src/store/mod.rs

//! Document store abstraction.
//!
//! Every record lives in a named collection as a JSON object plus
//! server-managed metadata (id, version, timestamps). Sub-collections are
//! addressed with a slash path, e.g. `quizzes/{id}/questions`.

pub mod memory;
pub mod postgres;
pub mod subscription;

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use subscription::{ChangeEvent, Subscription};

pub type Fields = Map<String, Value>;

pub const USERS: &str = "users";
pub const CREDENTIALS: &str = "credentials";
pub const QUIZZES: &str = "quizzes";
pub const ATTEMPTS: &str = "attempts";
pub const RESULTS: &str = "results";
pub const USER_STATS: &str = "user_stats";
pub const ACTIVITY_LOGS: &str = "activity_logs";
pub const AI_CONTENT: &str = "ai_content";

/// Collection path of a quiz's questions.
pub fn questions_of(quiz_id: &str) -> String {
    format!("{}/{}/questions", QUIZZES, quiz_id)
}

/// Generates a fresh document id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("document {collection}/{id} changed since it was read")]
    Conflict { collection: String, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    fn not_found(key: &DocKey) -> Self {
        StoreError::NotFound {
            collection: key.collection.clone(),
            id: key.id.clone(),
        }
    }

    /// True when retrying the whole read-modify-write cycle can succeed.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }
        )
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub data: Fields,
}

impl Document {
    /// The document as callers see it: its fields plus `id`, `createdAt`
    /// and `updatedAt`.
    pub fn to_json(&self) -> Value {
        let mut fields = self.data.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        fields.insert("createdAt".to_string(), json_time(&self.created_at));
        fields.insert("updatedAt".to_string(), json_time(&self.updated_at));
        Value::Object(fields)
    }

    /// Decodes the document into a model type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

fn json_time(at: &DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339())
}

/// Serializes a model into storable fields, dropping the metadata keys the
/// store manages itself.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(mut fields) => {
            for key in ["id", "createdAt", "updatedAt"] {
                fields.remove(key);
            }
            Ok(fields)
        }
        other => Err(StoreError::Backend(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Condition a write requires of the document's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Any,
    Exists,
    Missing,
    /// The document exists and is still at this version.
    Version(i64),
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Set {
        key: DocKey,
        data: Fields,
        /// Shallow-merge top level fields into the existing document
        /// instead of replacing it.
        merge: bool,
        precondition: Precondition,
    },
    Delete {
        key: DocKey,
        precondition: Precondition,
    },
}

impl WriteOp {
    pub fn create(collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        WriteOp::Set {
            key: DocKey::new(collection, id),
            data,
            merge: false,
            precondition: Precondition::Missing,
        }
    }

    /// Merge into an existing document, failing if it is missing.
    pub fn update(collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        WriteOp::Set {
            key: DocKey::new(collection, id),
            data,
            merge: true,
            precondition: Precondition::Exists,
        }
    }

    /// Merge into a document read at `version`.
    pub fn update_at(
        collection: impl Into<String>,
        id: impl Into<String>,
        data: Fields,
        version: i64,
    ) -> Self {
        WriteOp::Set {
            key: DocKey::new(collection, id),
            data,
            merge: true,
            precondition: Precondition::Version(version),
        }
    }

    /// Create or merge.
    pub fn upsert(
        collection: impl Into<String>,
        id: impl Into<String>,
        data: Fields,
        precondition: Precondition,
    ) -> Self {
        WriteOp::Set {
            key: DocKey::new(collection, id),
            data,
            merge: true,
            precondition,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        WriteOp::Delete {
            key: DocKey::new(collection, id),
            precondition: Precondition::Exists,
        }
    }

    pub fn key(&self) -> &DocKey {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }
}

/// Checks a precondition against the current version of a document
/// (`None` when it doesn't exist).
pub(crate) fn check_precondition(
    key: &DocKey,
    current: Option<i64>,
    precondition: Precondition,
) -> Result<(), StoreError> {
    match (precondition, current) {
        (Precondition::Any, _) => Ok(()),
        (Precondition::Exists, Some(_)) => Ok(()),
        (Precondition::Exists, None) | (Precondition::Version(_), None) => {
            Err(StoreError::not_found(key))
        }
        (Precondition::Missing, None) => Ok(()),
        (Precondition::Missing, Some(_)) => Err(StoreError::AlreadyExists {
            collection: key.collection.clone(),
            id: key.id.clone(),
        }),
        (Precondition::Version(expected), Some(actual)) if expected == actual => Ok(()),
        (Precondition::Version(_), Some(_)) => Err(StoreError::Conflict {
            collection: key.collection.clone(),
            id: key.id.clone(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// The field is an array holding the value.
    ArrayContains,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Evaluates the filter against a document's fields. Missing fields never
    /// match.
    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = fields.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            op => match compare_values(actual, &self.value) {
                Some(ord) => match op {
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Lte => ord != Ordering::Greater,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Gte => ord != Ordering::Less,
                    _ => false,
                },
                None => false,
            },
        }
    }
}

/// Orders two JSON scalars of the same kind.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A collection query: equality/range filters, one sort key and a limit.
/// Without an explicit order documents come back in creation order.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.collection == self.collection && self.filters.iter().all(|f| f.matches(&doc.data))
    }
}

/// Storage primitive consumed by the engine, the guard and the handlers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Applies all writes atomically: either every precondition holds and
    /// every write lands, or nothing changes. Returns the written documents
    /// (deletes are omitted).
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<Document>, StoreError>;

    /// Change feed used by [`Subscription`].
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;

    async fn create(&self, collection: &str, data: Fields) -> Result<Document, StoreError> {
        self.create_with_id(collection, &new_id(), data).await
    }

    async fn create_with_id(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
    ) -> Result<Document, StoreError> {
        single(self.commit(vec![WriteOp::create(collection, id, data)]).await?)
    }

    async fn update(&self, collection: &str, id: &str, data: Fields) -> Result<Document, StoreError> {
        single(self.commit(vec![WriteOp::update(collection, id, data)]).await?)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.commit(vec![WriteOp::delete(collection, id)]).await?;
        Ok(())
    }
}

fn single(mut docs: Vec<Document>) -> Result<Document, StoreError> {
    docs.pop()
        .ok_or_else(|| StoreError::Backend("write returned no document".to_string()))
}
